//! Binary feedback shift registers.

use crate::automaton::{pairwise_bound, Automaton, StateId, Symbol};
use crate::error::{CoreError, CoreResult};

/// Longest supported register.
const MAX_LENGTH: u8 = 32;

/// A binary shift register of length `L` with feedback table `φ` and output
/// table `ψ`, each holding `2^(L+1)` bits.
///
/// On input `x` the register shifts left by one and the feedback bit
/// `φ[(s << 1) | x]` enters at the low end. The output is `ψ` applied to the
/// pre-truncation window `(s << 1) | feedback`, i.e. the old state plus the new
/// bit.
///
/// ```text
/// state' = ((s << 1) | φ[(s << 1) | x]) & mask
/// y      = ψ[(s << 1) | φ[(s << 1) | x]]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftRegister {
    length: u8,
    mask: u64,
    phi: Vec<bool>,
    psi: Vec<bool>,
}

impl ShiftRegister {
    /// Create a register from its feedback and output tables.
    pub fn new(length: u8, phi: Vec<bool>, psi: Vec<bool>) -> CoreResult<Self> {
        if length == 0 || length > MAX_LENGTH {
            return Err(CoreError::InvalidRegisterLength { length });
        }

        let expected = 1usize << (length + 1);
        if phi.len() != expected {
            return Err(CoreError::TableSize {
                table: "phi",
                expected,
                actual: phi.len(),
            });
        }
        if psi.len() != expected {
            return Err(CoreError::TableSize {
                table: "psi",
                expected,
                actual: psi.len(),
            });
        }

        Ok(Self {
            length,
            mask: (1u64 << length) - 1,
            phi,
            psi,
        })
    }

    /// Create a register from `0`/`1` strings; whitespace is ignored.
    pub fn from_bits(length: u8, phi: &str, psi: &str) -> CoreResult<Self> {
        Self::new(length, parse_bits(phi)?, parse_bits(psi)?)
    }

    /// Register whose feedback bit is the input and whose output is the bit
    /// that just entered.
    pub fn identity(length: u8) -> CoreResult<Self> {
        if length == 0 || length > MAX_LENGTH {
            return Err(CoreError::InvalidRegisterLength { length });
        }
        let table: Vec<bool> = (0..1usize << (length + 1)).map(|i| i & 1 == 1).collect();
        Self::new(length, table.clone(), table)
    }

    /// Register length in bits.
    pub fn length(&self) -> u8 {
        self.length
    }

    fn feedback(&self, shifted: u64, input: Symbol) -> u64 {
        u64::from(self.phi[(shifted | u64::from(input & 1)) as usize])
    }
}

impl Automaton for ShiftRegister {
    fn state_function(&self, state: StateId, input: Symbol) -> StateId {
        let shifted = (state & self.mask) << 1;
        (shifted | self.feedback(shifted, input)) & self.mask
    }

    fn output_function(&self, state: StateId, input: Symbol) -> Symbol {
        let shifted = (state & self.mask) << 1;
        Symbol::from(self.psi[(shifted | self.feedback(shifted, input)) as usize])
    }

    fn num_states(&self) -> u64 {
        1u64 << self.length
    }

    fn num_inputs(&self) -> Symbol {
        2
    }

    fn memory_upper_bound(&self) -> u64 {
        pairwise_bound(self.num_states())
    }

    fn name(&self) -> &str {
        "shift_register"
    }
}

fn parse_bits(bits: &str) -> CoreResult<Vec<bool>> {
    bits.chars()
        .enumerate()
        .filter(|(_, ch)| !ch.is_whitespace())
        .map(|(position, ch)| match ch {
            '0' => Ok(false),
            '1' => Ok(true),
            _ => Err(CoreError::InvalidBit { ch, position }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_register_tracks_inputs() {
        let reg = ShiftRegister::identity(2).unwrap();

        assert_eq!(reg.num_states(), 4);
        assert_eq!(reg.state_function(0b01, 1), 0b11);
        assert_eq!(reg.state_function(0b11, 0), 0b10);
        assert_eq!(reg.output_function(0b10, 1), 1);
        assert_eq!(reg.output_function(0b10, 0), 0);
    }

    #[test]
    fn test_from_bits_ignores_whitespace() {
        // phi copies the input, psi reports the oldest bit of the window.
        let reg = ShiftRegister::from_bits(1, "01 01", "0011").unwrap();

        assert_eq!(reg.state_function(1, 0), 0);
        assert_eq!(reg.output_function(1, 0), 1);
        assert_eq!(reg.output_function(0, 1), 0);
    }

    #[test]
    fn test_rejects_bad_tables() {
        assert_eq!(
            ShiftRegister::identity(0),
            Err(CoreError::InvalidRegisterLength { length: 0 })
        );
        assert_eq!(
            ShiftRegister::from_bits(1, "010", "0101"),
            Err(CoreError::TableSize {
                table: "phi",
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            ShiftRegister::from_bits(1, "0101", "01x1"),
            Err(CoreError::InvalidBit {
                ch: 'x',
                position: 2
            })
        );
    }
}
