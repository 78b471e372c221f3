// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Channelizing SDR receiver core: overlap-save filtering, AM/FM/linear
//! demodulation, a dual-LO tuning plane, and the TLV status/command
//! protocol that binds every tunable and every meter into one wire
//! vocabulary.

pub mod channel;
pub mod config;
pub mod demod;
pub mod error;
pub mod filter;
pub mod oscillator;
pub mod receiver;
pub mod rtp;
pub mod sample;
pub mod status;
pub mod tuning;
pub mod window;

pub use config::ReceiverConfig;
pub use error::{RadioError, Result};
pub use receiver::Receiver;
pub use sample::Sample;
