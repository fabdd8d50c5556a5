// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The application side of a Modbus server.

use crate::{
    SlaveId,
    object::{Coil, DiscreteInput, HoldingRegister, InputRegister},
};

/// A device served on the bus.
///
/// Each hook handles exactly one object and returns `true` on success.
/// Read hooks fill in the value of the given object, write hooks receive
/// the value to apply. A hook returning `false` is answered with an
/// [`IllegalDataAddress`](crate::Exception::IllegalDataAddress) exception.
///
/// All hooks default to `false`, so an implementation only overrides the
/// object kinds it supports.
pub trait Device {
    /// The slave id the device answers to.
    fn id(&self) -> SlaveId;

    fn read_coil(&mut self, _coil: &mut Coil) -> bool {
        false
    }

    fn read_discrete_input(&mut self, _input: &mut DiscreteInput) -> bool {
        false
    }

    fn read_holding_register(&mut self, _register: &mut HoldingRegister) -> bool {
        false
    }

    fn read_input_register(&mut self, _register: &mut InputRegister) -> bool {
        false
    }

    fn write_coil(&mut self, _coil: &Coil) -> bool {
        false
    }

    fn write_holding_register(&mut self, _register: &HoldingRegister) -> bool {
        false
    }
}

/// Share a device between the listener thread and the application.
///
/// A poisoned lock fails every hook.
#[cfg(feature = "std")]
impl<D: Device> Device for std::sync::Arc<std::sync::Mutex<D>> {
    fn id(&self) -> SlaveId {
        // The id is needed to filter frames, so it is read even from a poisoned lock.
        match self.lock() {
            Ok(device) => device.id(),
            Err(poisoned) => poisoned.into_inner().id(),
        }
    }

    fn read_coil(&mut self, coil: &mut Coil) -> bool {
        self.lock().is_ok_and(|mut d| d.read_coil(coil))
    }

    fn read_discrete_input(&mut self, input: &mut DiscreteInput) -> bool {
        self.lock().is_ok_and(|mut d| d.read_discrete_input(input))
    }

    fn read_holding_register(&mut self, register: &mut HoldingRegister) -> bool {
        self.lock().is_ok_and(|mut d| d.read_holding_register(register))
    }

    fn read_input_register(&mut self, register: &mut InputRegister) -> bool {
        self.lock().is_ok_and(|mut d| d.read_input_register(register))
    }

    fn write_coil(&mut self, coil: &Coil) -> bool {
        self.lock().is_ok_and(|mut d| d.write_coil(coil))
    }

    fn write_holding_register(&mut self, register: &HoldingRegister) -> bool {
        self.lock().is_ok_and(|mut d| d.write_holding_register(register))
    }
}
