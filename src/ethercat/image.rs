//! Process image offsets.
//!
//! Slaves point into an IO map owned by the caller. The helpers here turn those
//! locations back into offsets relative to the start of the IO map.

use super::main::Slave;

/// Location of a slave's process data inside the caller's IO map
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoMapping {
    address: usize,
    length: usize,
}

impl IoMapping {
    /// Captures the location of `data`, which has to stay inside the IO map it was taken from
    pub fn new(data: &[u8]) -> Self {
        Self {
            address: data.as_ptr() as usize,
            length: data.len(),
        }
    }

    pub const fn address(&self) -> usize {
        self.address
    }

    pub const fn len(&self) -> usize {
        self.length
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Byte offset of this mapping relative to the start of `buffer`.
    ///
    /// The mapping must lie within `buffer`, which is asserted in debug builds. Outside of
    /// it the result is meaningless.
    pub fn offset_in(&self, buffer: &[u8]) -> i32 {
        let base = buffer.as_ptr() as usize;
        debug_assert!(
            self.address >= base && self.address + self.length <= base + buffer.len(),
            "mapping at {:#x}+{} lies outside the IO map at {base:#x}+{}",
            self.address,
            self.length,
            buffer.len()
        );
        self.address.wrapping_sub(base) as i32
    }
}

/// Offset of the slave's inputs in `buffer`, `None` if the slave has no inputs mapped
pub fn input_offset(slave: &Slave, buffer: &[u8]) -> Option<i32> {
    slave.inputs.map(|inputs| inputs.offset_in(buffer))
}

/// Offset of the slave's outputs in `buffer`, `None` if the slave has no outputs mapped
pub fn output_offset(slave: &Slave, buffer: &[u8]) -> Option<i32> {
    slave.outputs.map(|outputs| outputs.offset_in(buffer))
}

/// Bit cursor over a slave's process data, bounded by its mapped bit size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferOffset {
    bit_size: usize,
    byte_offset: usize,
    bit_offset: u8,
}

impl BufferOffset {
    /// Cursor positioned at `byte_offset`/`bit_offset`, covering `bit_size` bits from there
    pub fn new(byte_offset: usize, bit_offset: u8, bit_size: usize) -> Self {
        let mut offset = Self {
            bit_size: byte_offset * 8 + usize::from(bit_offset) + bit_size,
            byte_offset: 0,
            bit_offset: 0,
        };
        offset.increase(byte_offset, bit_offset);
        offset
    }

    /// Cursor over the slave's inputs, `None` if the slave has no inputs mapped
    pub fn inputs(slave: &Slave, buffer: &[u8]) -> Option<Self> {
        let offset = usize::try_from(input_offset(slave, buffer)?).ok()?;
        Some(Self::new(
            offset,
            slave.input_startbit,
            usize::from(slave.input_bits),
        ))
    }

    /// Cursor over the slave's outputs, `None` if the slave has no outputs mapped
    pub fn outputs(slave: &Slave, buffer: &[u8]) -> Option<Self> {
        let offset = usize::try_from(output_offset(slave, buffer)?).ok()?;
        Some(Self::new(
            offset,
            slave.output_startbit,
            usize::from(slave.output_bits),
        ))
    }

    pub const fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub const fn bit_offset(&self) -> u8 {
        self.bit_offset
    }

    /// End of the covered range in bits, counted from the start of the buffer
    pub const fn bit_size(&self) -> usize {
        self.bit_size
    }

    /// Moves to the next byte boundary if a field of `bytes` bytes and `bits` bits starts
    /// inside a partially used byte. Fields smaller than a byte are packed.
    pub fn align(&mut self, bytes: usize, bits: u8) {
        let bytes = bytes + usize::from(bits >> 3);
        if bytes > 0 && self.bit_offset > 0 {
            self.byte_offset += 1;
            self.bit_offset = 0;
        }
    }

    /// Advances by `bytes` bytes and `bits` bits. The cursor stays put and false is returned
    /// if that would pass the end of the covered range.
    pub fn increase(&mut self, bytes: usize, bits: u8) -> bool {
        let bit = usize::from(self.bit_offset) + usize::from(bits);
        let byte = self.byte_offset + bytes + (bit >> 3);
        let bit = bit & 7;
        if (byte << 3) + bit > self.bit_size {
            return false;
        }
        self.byte_offset = byte;
        self.bit_offset = bit as u8;
        true
    }
}
