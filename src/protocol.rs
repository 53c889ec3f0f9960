//! Prologix GPIB-ETHERNET command set.
//!
//! Reference: Prologix GPIB-ETHERNET Controller User Manual
//!
//! Protocol Overview:
//! - Transport: plain TCP, port 1234, no framing
//! - Adapter commands start with `++`; anything else is forwarded to the
//!   currently addressed instrument
//! - Setup commands are LF terminated, addressing and read requests are CR
//!   terminated (the adapter accepts either)
//! - Responses: raw ASCII bytes, one receive per reply

/// TCP port the adapter listens on. Fixed by the vendor.
pub const PORT: u16 = 1234;

/// Query the adapter firmware version string.
pub const VERSION: &str = "++ver\n";

/// Put the adapter in CONTROLLER mode.
pub const CONTROLLER_MODE: &str = "++mode 1\n";

/// Disable read-after-write; responses are requested explicitly.
pub const AUTO_READ_OFF: &str = "++auto 0\n";

/// Assert EOI with the last byte of every write.
pub const EOI_ON: &str = "++eoi 1\n";

/// Do not append an EOT character to forwarded responses.
pub const EOT_OFF: &str = "++eot_enable 0\n";

/// Read from the addressed instrument until EOI is detected.
pub const READ_EOI: &str = "++read eoi\r";

/// Terminator appended to instrument commands by `ask`.
pub const INSTRUMENT_TERMINATOR: &str = "\n";

/// Range of `++read_tmo_ms` values the adapter accepts.
pub const READ_TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u128> = 1..=3000;

/// `++addr <n>\r`: select the instrument at GPIB primary address `n`.
///
/// Not range checked; the adapter decides what it accepts.
#[must_use]
pub fn set_address(address: i32) -> String {
    format!("++addr {}\r", address)
}

/// `++read_tmo_ms <ms>\n`: adapter-side inter-character read timeout.
#[must_use]
pub fn read_timeout_ms(ms: u128) -> String {
    format!("++read_tmo_ms {}\n", ms)
}

/// Setup sequence sent once after connecting, in order.
#[must_use]
pub fn setup_sequence(read_timeout_ms_value: u128) -> [String; 5] {
    [
        CONTROLLER_MODE.to_string(),
        AUTO_READ_OFF.to_string(),
        EOI_ON.to_string(),
        EOT_OFF.to_string(),
        read_timeout_ms(read_timeout_ms_value),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_command_is_cr_terminated() {
        assert_eq!(set_address(5), "++addr 5\r");
        assert_eq!(set_address(12), "++addr 12\r");
        // Out of range values are passed through untouched
        assert_eq!(set_address(31), "++addr 31\r");
        assert_eq!(set_address(-1), "++addr -1\r");
    }

    #[test]
    fn setup_sequence_order() {
        let seq = setup_sequence(2000);
        assert_eq!(
            seq,
            [
                "++mode 1\n".to_string(),
                "++auto 0\n".to_string(),
                "++eoi 1\n".to_string(),
                "++eot_enable 0\n".to_string(),
                "++read_tmo_ms 2000\n".to_string(),
            ]
        );
    }
}
