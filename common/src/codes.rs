use core::fmt;

/// IR modulation scheme. This heater family only speaks NEC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrProtocol {
    Nec,
}

impl IrProtocol {
    pub const fn bits(self) -> u8 {
        match self {
            Self::Nec => 32,
        }
    }
}

/// One remote-control button press, as captured from the original remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseCode {
    pub protocol: IrProtocol,
    pub value: u32,
}

impl PulseCode {
    pub const fn nec(value: u32) -> Self {
        Self {
            protocol: IrProtocol::Nec,
            value,
        }
    }

    /// NEC frames carry the command byte followed by its complement.
    pub const fn is_well_formed(self) -> bool {
        let command = ((self.value >> 8) & 0xff) as u8;
        let inverse = (self.value & 0xff) as u8;
        command ^ inverse == 0xff
    }
}

pub const NEC_LEADER_MARK_US: u16 = 9_000;
pub const NEC_LEADER_SPACE_US: u16 = 4_500;
pub const NEC_BIT_MARK_US: u16 = 560;
pub const NEC_ZERO_SPACE_US: u16 = 560;
pub const NEC_ONE_SPACE_US: u16 = 1_690;

impl PulseCode {
    /// Mark/space durations in microseconds, starting with a mark.
    ///
    /// Leader, then the 32 data bits most significant first, then a closing
    /// bit mark so the last space has a defined end.
    pub fn timings(self) -> Vec<u16> {
        let bits = self.protocol.bits();
        let mut timings = Vec::with_capacity(2 + 2 * bits as usize + 1);
        timings.push(NEC_LEADER_MARK_US);
        timings.push(NEC_LEADER_SPACE_US);

        for bit in (0..bits).rev() {
            timings.push(NEC_BIT_MARK_US);
            if self.value & (1 << bit) != 0 {
                timings.push(NEC_ONE_SPACE_US);
            } else {
                timings.push(NEC_ZERO_SPACE_US);
            }
        }

        timings.push(NEC_BIT_MARK_US);
        timings
    }
}

impl fmt::Display for PulseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:0x{:08X}", self.protocol, self.value)
    }
}

pub const IR_POWER_TOGGLE: PulseCode = PulseCode::nec(0x00FF_A25D);
pub const IR_POWER_LEVEL: PulseCode = PulseCode::nec(0x00FF_629D);
pub const IR_OSCILLATION_TOGGLE: PulseCode = PulseCode::nec(0x00FF_E21D);
pub const IR_SLEEP_TIMER: PulseCode = PulseCode::nec(0x00FF_22DD);
pub const IR_TEMP_MODE: PulseCode = PulseCode::nec(0x00FF_02FD);
pub const IR_TEMP_UP: PulseCode = PulseCode::nec(0x00FF_C23D);
pub const IR_TEMP_DOWN: PulseCode = PulseCode::nec(0x00FF_E01F);
