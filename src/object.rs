// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Addressable Modbus objects.
//!
//! Every object carries its [`Address`] and a raw 16 bit value that is
//! always stored in wire order (high byte first), independent of the
//! byte order of the host.

use crate::{frame::Address, util::bool_to_u16_coil};

/// An addressable entity with a raw 16 bit value.
pub trait ModbusObject {
    /// The address of the object (`0` - `65535`).
    fn address(&self) -> Address;

    /// The raw value as `[hi, lo]`.
    fn raw(&self) -> [u8; 2];

    /// Replace the raw value given as `[hi, lo]`.
    fn set_raw(&mut self, raw: [u8; 2]);
}

macro_rules! modbus_object {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            address: Address,
            hi: u8,
            lo: u8,
        }

        impl ModbusObject for $name {
            fn address(&self) -> Address {
                self.address
            }

            fn raw(&self) -> [u8; 2] {
                [self.hi, self.lo]
            }

            fn set_raw(&mut self, [hi, lo]: [u8; 2]) {
                self.hi = hi;
                self.lo = lo;
            }
        }
    };
}

macro_rules! bit_object {
    ($(#[$meta:meta])* $name:ident) => {
        modbus_object!($(#[$meta])* $name);

        impl $name {
            /// A new object at `address` that is `OFF`.
            #[must_use]
            pub const fn new(address: Address) -> Self {
                Self { address, hi: 0, lo: 0 }
            }

            #[must_use]
            pub const fn with_value(address: Address, value: bool) -> Self {
                let [hi, lo] = bool_to_u16_coil(value).to_be_bytes();
                Self { address, hi, lo }
            }

            /// Any nonzero raw value reads as `ON`.
            #[must_use]
            pub const fn value(&self) -> bool {
                self.hi != 0 || self.lo != 0
            }

            /// Stores `0xFF00` for `ON` and `0x0000` for `OFF`.
            pub const fn set_value(&mut self, value: bool) {
                let [hi, lo] = bool_to_u16_coil(value).to_be_bytes();
                self.hi = hi;
                self.lo = lo;
            }
        }
    };
}

macro_rules! word_object {
    ($(#[$meta:meta])* $name:ident) => {
        modbus_object!($(#[$meta])* $name);

        impl $name {
            #[must_use]
            pub const fn new(address: Address) -> Self {
                Self { address, hi: 0, lo: 0 }
            }

            #[must_use]
            pub const fn with_value(address: Address, value: u16) -> Self {
                let [hi, lo] = value.to_be_bytes();
                Self { address, hi, lo }
            }

            #[must_use]
            pub const fn value(&self) -> u16 {
                u16::from_be_bytes([self.hi, self.lo])
            }

            pub const fn set_value(&mut self, value: u16) {
                let [hi, lo] = value.to_be_bytes();
                self.hi = hi;
                self.lo = lo;
            }

            /// The value interpreted as two's complement.
            #[must_use]
            pub const fn signed_value(&self) -> i16 {
                i16::from_be_bytes([self.hi, self.lo])
            }

            pub const fn set_signed_value(&mut self, value: i16) {
                let [hi, lo] = value.to_be_bytes();
                self.hi = hi;
                self.lo = lo;
            }
        }
    };
}

bit_object!(
    /// A single read/write bit, e.g. a relay.
    Coil
);

bit_object!(
    /// A single read-only bit.
    DiscreteInput
);

word_object!(
    /// A read/write 16 bit word.
    HoldingRegister
);

word_object!(
    /// A read-only 16 bit word.
    InputRegister
);
