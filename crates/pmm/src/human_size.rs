//! Human-readable size formatting for memory values.

use core::fmt;

/// Wraps a size in bytes and formats it as a human-readable value with binary SI prefixes.
///
/// Each unit is 1024 times the previous one. Values are shown with up to 2 decimal places
/// (truncated, not rounded), omitting trailing zeros.
///
/// # Examples
///
/// ```
/// use pmm::HumanSize;
///
/// assert_eq!(format!("{}", HumanSize(0)), "0B");
/// assert_eq!(format!("{}", HumanSize(1023)), "1023B");
/// assert_eq!(format!("{}", HumanSize(1536)), "1.5KiB");
/// assert_eq!(format!("{}", HumanSize(64 * 4096)), "256KiB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HumanSize(pub usize);

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

        let mut unit = 0;
        let mut divisor: u64 = 1;
        let bytes = self.0 as u64;
        while unit < UNITS.len() - 1 && bytes >= divisor * 1024 {
            divisor *= 1024;
            unit += 1;
        }

        let whole = bytes / divisor;
        let hundredths = (bytes % divisor) * 100 / divisor;
        match hundredths {
            0 => write!(f, "{}{}", whole, UNITS[unit]),
            h if h % 10 == 0 => write!(f, "{}.{}{}", whole, h / 10, UNITS[unit]),
            h => write!(f, "{}.{:02}{}", whole, h, UNITS[unit]),
        }
    }
}
