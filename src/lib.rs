// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

mod codec;
mod device;
mod error;
mod frame;
mod object;
mod util;

#[cfg(feature = "std")]
mod client;
#[cfg(feature = "std")]
mod config;
#[cfg(feature = "std")]
mod server;
#[cfg(feature = "std")]
pub mod transport;

pub use codec::rtu;
pub use device::Device;
pub use error::*;
pub use frame::rtu::{BROADCAST_ADDRESS, SlaveId};
pub use frame::*;
pub use object::{Coil, DiscreteInput, HoldingRegister, InputRegister, ModbusObject};

#[cfg(feature = "std")]
pub use self::{
    client::Client,
    config::{Config, DEFAULT_READ_TIMEOUT},
    server::{LISTENER_THREAD_NAME, Listener, Server},
    transport::Transport,
};

#[cfg(feature = "serial")]
pub use transport::{SerialConfig, SerialTransport};
