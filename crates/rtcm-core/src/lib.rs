//! RTCM 3.x frame handling for NTRIP correction streams.
//!
//! This crate provides byte-stream frame boundary detection, CRC-24Q
//! validation, and message-type extraction for RTCM 3.x correction frames.
//! It performs no I/O and does not interpret payloads beyond the 12-bit
//! message-type field.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod crc24;
pub mod messages;
pub mod parser;

pub use crc24::{crc24q, crc24q_update};
pub use messages::message_description;
pub use parser::{FrameEvent, PREAMBLE, RtcmParser};
