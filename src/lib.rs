//! # HoTT Link Library
//!
//! Decode Graupner HoTT telemetry and talk to HoTT devices over a serial link.
//!
//! This library provides the frame codec and sensor decoders, the package-loss
//! tracker, a replay loop for stored captures, and a query session for live
//! devices including the SD card transfer commands.

pub mod capture;
pub mod config;
pub mod error;
pub mod hott;
pub mod loss;
pub mod serial;
