//! # Frame decoder
//!
//! The meter streams its LCD contents as fixed 14-byte frames. The protocol is
//! positional: each byte carries a few display segments or indicator bits in
//! its low nibble, and every field lives at a fixed byte and bit.
//!
//! Each of the four digits spans two bytes. The low three bits of the first
//! byte are the high part of a 7-bit segment pattern and the low four bits of
//! the second byte are the low part. Bit 3 of the first byte is an ancillary
//! flag: the minus sign for the thousands cell, a decimal point for the others.
//!
//! Decoding is total. Every input produces a [`Frame`]; patterns that are not
//! in the segment table surface as [`Digit::Invalid`] and make the numeric
//! value unavailable without hiding the indicator flags.

use std::fmt;

use chrono::{DateTime, Local};
use thiserror::Error;

/// Number of bytes in one frame on the wire.
pub const FRAME_LEN: usize = 14;

/// Position of a digit on the display, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Thousand,
    Hundred,
    Ten,
    Single,
}

impl Cell {
    pub const ALL: [Cell; 4] = [Cell::Thousand, Cell::Hundred, Cell::Ten, Cell::Single];

    fn index(self) -> usize {
        match self {
            Cell::Thousand => 0,
            Cell::Hundred => 1,
            Cell::Ten => 2,
            Cell::Single => 3,
        }
    }
}

/// Field of a frame that could not be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeFault {
    #[error("invalid segment pattern {pattern:#09b} in {cell:?} cell")]
    InvalidDigit { cell: Cell, pattern: u8 },
    #[error("no unit indicator set")]
    NoUnit,
}

/// What a single seven-segment cell shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Digit {
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    /// All segments off.
    Blank,
    /// The letter "L", shown for over-range and open circuits.
    OverRange,
    /// A pattern outside the segment table, kept for diagnostics.
    Invalid(u8),
}

impl Digit {
    /// Maps a raw segment pattern onto the digit it draws.
    pub fn from_segments(pattern: u8) -> Digit {
        match pattern {
            0b0111_1101 => Digit::Zero,
            0b0000_0101 => Digit::One,
            0b0101_1011 => Digit::Two,
            0b0001_1111 => Digit::Three,
            0b0010_0111 => Digit::Four,
            0b0011_1110 => Digit::Five,
            0b0111_1110 => Digit::Six,
            0b0001_0101 => Digit::Seven,
            0b0111_1111 => Digit::Eight,
            0b0011_1111 => Digit::Nine,
            0b0000_0000 => Digit::Blank,
            0b0110_1000 => Digit::OverRange,
            other => Digit::Invalid(other),
        }
    }

    /// Numeric value of the digit, `None` for blank, "L" and invalid cells.
    pub fn value(self) -> Option<u32> {
        match self {
            Digit::Zero => Some(0),
            Digit::One => Some(1),
            Digit::Two => Some(2),
            Digit::Three => Some(3),
            Digit::Four => Some(4),
            Digit::Five => Some(5),
            Digit::Six => Some(6),
            Digit::Seven => Some(7),
            Digit::Eight => Some(8),
            Digit::Nine => Some(9),
            Digit::Blank | Digit::OverRange | Digit::Invalid(_) => None,
        }
    }

    pub fn is_valid(self) -> bool {
        !matches!(self, Digit::Invalid(_))
    }

    /// The character the LCD shows for this cell.
    pub fn to_char(self) -> char {
        match self {
            Digit::Blank => ' ',
            Digit::OverRange => 'L',
            Digit::Invalid(_) => '?',
            digit => match digit.value().and_then(|v| char::from_digit(v, 10)) {
                Some(c) => c,
                None => '?',
            },
        }
    }
}

/// One digit position: its segment pattern and the flag sharing its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitCell {
    pub segments: u8,
    pub flag: bool,
}

impl DigitCell {
    fn unpack(high: u8, low: u8) -> Self {
        Self {
            segments: ((high & 0x07) << 4) | (low & 0x0F),
            flag: bit(high, 3),
        }
    }

    pub fn digit(&self) -> Digit {
        Digit::from_segments(self.segments)
    }
}

// Mode and annunciator bits from bytes 0 and 9-12.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub auto: bool,
    pub dc: bool,
    pub ac: bool,
    pub diode: bool,
    pub beep: bool,
    pub hold: bool,
    pub rel: bool,
    pub battery: bool,
}

// Unit indicator bits. The meter is not guaranteed to set them exclusively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitFlags {
    pub kilo: bool,
    pub nano: bool,
    pub micro: bool,
    pub mega: bool,
    pub milli: bool,
    pub milli_volt: bool,
    pub percent: bool,
    pub ohm: bool,
    pub farad: bool,
    pub hertz: bool,
    pub volt: bool,
    pub ampere: bool,
    pub celsius: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Nano,
    Micro,
    Milli,
    None,
    Kilo,
    Mega,
}

impl Prefix {
    pub fn symbol(self) -> &'static str {
        match self {
            Prefix::Nano => "n",
            Prefix::Micro => "\u{00B5}",
            Prefix::Milli => "m",
            Prefix::None => "",
            Prefix::Kilo => "k",
            Prefix::Mega => "M",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    Volt,
    Ohm,
    Farad,
    Hertz,
    Percent,
    Celsius,
    Ampere,
}

impl Base {
    pub fn symbol(self) -> &'static str {
        match self {
            Base::Volt => "V",
            Base::Ohm => "\u{03A9}",
            Base::Farad => "F",
            Base::Hertz => "Hz",
            Base::Percent => "%",
            Base::Celsius => "\u{00B0}C",
            Base::Ampere => "A",
        }
    }
}

/// Displayed unit: magnitude prefix times physical quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    pub prefix: Prefix,
    pub base: Base,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix.symbol(), self.base.symbol())
    }
}

/// One decoded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp: DateTime<Local>,
    /// Thousands, hundreds, tens and units, in display order.
    pub cells: [DigitCell; 4],
    pub status: StatusFlags,
    pub units: UnitFlags,
}

impl Frame {
    /// Decodes one raw frame captured at `timestamp`.
    pub fn decode(buf: &[u8; FRAME_LEN], timestamp: DateTime<Local>) -> Frame {
        let cells = [
            DigitCell::unpack(buf[1], buf[2]),
            DigitCell::unpack(buf[3], buf[4]),
            DigitCell::unpack(buf[5], buf[6]),
            DigitCell::unpack(buf[7], buf[8]),
        ];

        let status = StatusFlags {
            auto: bit(buf[0], 1),
            dc: bit(buf[0], 2),
            ac: bit(buf[0], 3),
            diode: bit(buf[9], 0),
            beep: bit(buf[10], 0),
            hold: bit(buf[11], 0),
            rel: bit(buf[11], 1),
            battery: bit(buf[12], 0),
        };

        let units = UnitFlags {
            kilo: bit(buf[9], 1),
            nano: bit(buf[9], 2),
            micro: bit(buf[9], 3),
            mega: bit(buf[10], 1),
            percent: bit(buf[10], 2),
            milli: bit(buf[10], 3),
            ohm: bit(buf[11], 2),
            farad: bit(buf[11], 3),
            hertz: bit(buf[12], 1),
            volt: bit(buf[12], 2),
            ampere: bit(buf[12], 3),
            celsius: bit(buf[13], 1),
            milli_volt: bit(buf[13], 2),
        };

        Frame {
            timestamp,
            cells,
            status,
            units,
        }
    }

    pub fn cell(&self, cell: Cell) -> DigitCell {
        self.cells[cell.index()]
    }

    pub fn digit(&self, cell: Cell) -> Digit {
        self.cell(cell).digit()
    }

    pub fn is_negative(&self) -> bool {
        self.cells[0].flag
    }

    /// Decimal point flags carried by the hundreds, tens and units cells.
    ///
    /// A point on the hundreds cell divides the reading by 1000, on the tens
    /// cell by 100 and on the units cell by 10.
    pub fn decimal_points(&self) -> [bool; 3] {
        [self.cells[1].flag, self.cells[2].flag, self.cells[3].flag]
    }

    /// Numeric reading, or `None` when any cell is not a digit.
    ///
    /// When several decimal points are set, every one of them is applied, in
    /// the order /10, /100, /1000.
    pub fn value(&self) -> Option<f64> {
        let mut magnitude = 0u32;
        for cell in &self.cells {
            magnitude = magnitude * 10 + cell.digit().value()?;
        }

        let mut result = f64::from(magnitude);
        if self.is_negative() {
            result = -result;
        }

        let divisors = [1000.0, 100.0, 10.0];
        for (set, divisor) in self.decimal_points().iter().zip(divisors).rev() {
            if *set {
                result /= divisor;
            }
        }

        Some(result)
    }

    pub fn value_or_zero(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }

    /// Resolves the unit indicators.
    ///
    /// `milli_volt` wins outright. Otherwise the prefix is the first set flag
    /// of kilo, nano, micro, mega, milli and the base the first of percent,
    /// ohm, farad, hertz, volt, ampere, celsius.
    pub fn unit(&self) -> Result<Unit, DecodeFault> {
        let u = &self.units;
        if u.milli_volt {
            return Ok(Unit {
                prefix: Prefix::Milli,
                base: Base::Volt,
            });
        }

        let prefix = if u.kilo {
            Prefix::Kilo
        } else if u.nano {
            Prefix::Nano
        } else if u.micro {
            Prefix::Micro
        } else if u.mega {
            Prefix::Mega
        } else if u.milli {
            Prefix::Milli
        } else {
            Prefix::None
        };

        let base = if u.percent {
            Base::Percent
        } else if u.ohm {
            Base::Ohm
        } else if u.farad {
            Base::Farad
        } else if u.hertz {
            Base::Hertz
        } else if u.volt {
            Base::Volt
        } else if u.ampere {
            Base::Ampere
        } else if u.celsius {
            Base::Celsius
        } else {
            return Err(DecodeFault::NoUnit);
        };

        Ok(Unit { prefix, base })
    }

    /// Unit symbol, empty when no unit indicator is set.
    pub fn unit_symbol(&self) -> String {
        self.unit().map(|unit| unit.to_string()).unwrap_or_default()
    }

    /// Every field of this frame that could not be interpreted.
    pub fn faults(&self) -> Vec<DecodeFault> {
        let mut faults: Vec<DecodeFault> = Cell::ALL
            .iter()
            .filter_map(|&cell| match self.digit(cell) {
                Digit::Invalid(pattern) => Some(DecodeFault::InvalidDigit { cell, pattern }),
                _ => None,
            })
            .collect();
        if let Err(fault) = self.unit() {
            faults.push(fault);
        }
        faults
    }

    /// The digits as the LCD draws them, sign and decimal point included.
    pub fn display_digits(&self) -> String {
        let mut text = String::with_capacity(6);
        text.push(if self.is_negative() { '-' } else { ' ' });
        for (i, cell) in self.cells.iter().enumerate() {
            if i > 0 && cell.flag {
                text.push('.');
            }
            text.push(cell.digit().to_char());
        }
        text
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.display_digits(), self.unit_symbol())
    }
}

fn bit(byte: u8, n: u8) -> bool {
    byte & (1 << n) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEGMENTS: [u8; 10] = [
        0b0111_1101,
        0b0000_0101,
        0b0101_1011,
        0b0001_1111,
        0b0010_0111,
        0b0011_1110,
        0b0111_1110,
        0b0001_0101,
        0b0111_1111,
        0b0011_1111,
    ];

    // Lays out four segment patterns, thousands first, with the volt flag set.
    fn raw(patterns: [u8; 4]) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        for (i, pattern) in patterns.iter().enumerate() {
            buf[1 + 2 * i] = (pattern >> 4) & 0x07;
            buf[2 + 2 * i] = pattern & 0x0F;
        }
        buf[12] = 1 << 2;
        buf
    }

    fn digits(values: [usize; 4]) -> [u8; FRAME_LEN] {
        raw(values.map(|v| SEGMENTS[v]))
    }

    fn decode(buf: [u8; FRAME_LEN]) -> Frame {
        Frame::decode(&buf, Local::now())
    }

    #[test]
    fn segment_table_maps_all_twelve_patterns() {
        for (value, &pattern) in SEGMENTS.iter().enumerate() {
            assert_eq!(Digit::from_segments(pattern).value(), Some(value as u32));
        }
        assert_eq!(Digit::from_segments(0), Digit::Blank);
        assert_eq!(Digit::from_segments(0b0110_1000), Digit::OverRange);
        assert_eq!(Digit::from_segments(0b0000_0001), Digit::Invalid(1));
    }

    #[test]
    fn digit_characters() {
        assert_eq!(Digit::Blank.to_char(), ' ');
        assert_eq!(Digit::OverRange.to_char(), 'L');
        assert_eq!(Digit::Invalid(0x55).to_char(), '?');
        assert_eq!(Digit::Seven.to_char(), '7');
    }

    #[test]
    fn plain_value() {
        let frame = decode(digits([4, 3, 2, 1]));
        assert_eq!(frame.value(), Some(4321.0));
        assert!(frame.faults().is_empty());
    }

    #[test]
    fn decimal_point_on_tens_divides_by_hundred() {
        let mut buf = digits([4, 3, 2, 1]);
        buf[5] |= 0x08;
        assert_eq!(decode(buf).value(), Some(43.21));
    }

    #[test]
    fn decimal_points_on_hundreds_and_units() {
        let mut buf = digits([4, 3, 2, 1]);
        buf[3] |= 0x08;
        assert_eq!(decode(buf).value(), Some(4.321));

        let mut buf = digits([4, 3, 2, 1]);
        buf[7] |= 0x08;
        assert_eq!(decode(buf).value(), Some(432.1));
    }

    #[test]
    fn multiple_decimal_points_all_apply() {
        let mut buf = digits([1, 0, 0, 0]);
        buf[5] |= 0x08;
        buf[7] |= 0x08;
        // 1000 / 10 / 100
        assert_eq!(decode(buf).value(), Some(1.0));
    }

    #[test]
    fn sign_negates() {
        let mut buf = digits([4, 3, 2, 1]);
        buf[1] |= 0x08;
        assert_eq!(decode(buf).value(), Some(-4321.0));
        buf[5] |= 0x08;
        assert_eq!(decode(buf).value(), Some(-43.21));
    }

    #[test]
    fn non_numeric_cells_have_no_value() {
        let frame = decode(raw([0, SEGMENTS[0], 0b0110_1000, 0]));
        assert_eq!(frame.value(), None);
        assert_eq!(frame.value_or_zero(), 0.0);
        assert!(frame.faults().is_empty());
    }

    #[test]
    fn invalid_pattern_keeps_flags_usable() {
        let mut buf = raw([SEGMENTS[1], 0b0000_0011, SEGMENTS[2], SEGMENTS[3]]);
        buf[0] = 0b0000_1010; // AUTO + AC
        buf[11] = 0b0000_0001; // hold
        let frame = decode(buf);

        assert_eq!(frame.value(), None);
        assert!(frame.status.auto);
        assert!(frame.status.ac);
        assert!(frame.status.hold);
        assert_eq!(
            frame.faults(),
            vec![DecodeFault::InvalidDigit {
                cell: Cell::Hundred,
                pattern: 0b0000_0011
            }]
        );
    }

    #[test]
    fn status_flag_positions() {
        let mut buf = digits([0, 0, 0, 0]);
        buf[0] = 0b0000_0110;
        buf[9] = 0b0000_0001;
        buf[10] = 0b0000_0001;
        buf[11] = 0b0000_0010;
        buf[12] |= 0b0000_0001;
        let status = decode(buf).status;
        assert_eq!(
            status,
            StatusFlags {
                auto: true,
                dc: true,
                ac: false,
                diode: true,
                beep: true,
                hold: false,
                rel: true,
                battery: true,
            }
        );
    }

    #[test]
    fn kilo_beats_milli() {
        let mut buf = digits([0, 0, 0, 0]);
        buf[9] |= 1 << 1;
        buf[10] |= 1 << 3;
        let unit = decode(buf).unit().unwrap();
        assert_eq!(unit.prefix, Prefix::Kilo);
        assert_eq!(unit.base, Base::Volt);
    }

    #[test]
    fn milli_volt_overrides_other_unit_bits() {
        let mut buf = digits([0, 0, 0, 0]);
        buf[9] |= 1 << 1;
        buf[13] |= 1 << 2;
        let unit = decode(buf).unit().unwrap();
        assert_eq!(
            unit,
            Unit {
                prefix: Prefix::Milli,
                base: Base::Volt
            }
        );
        assert_eq!(unit.to_string(), "mV");
    }

    #[test]
    fn base_priority() {
        let mut buf = digits([0, 0, 0, 0]);
        buf[11] |= 1 << 2; // ohm
        buf[12] |= 1 << 3; // ampere
        assert_eq!(decode(buf).unit().unwrap().base, Base::Ohm);

        let mut buf = digits([0, 0, 0, 0]);
        buf[12] = 0;
        buf[13] = 1 << 1;
        assert_eq!(decode(buf).unit_symbol(), "\u{00B0}C");
    }

    #[test]
    fn missing_unit_is_a_fault() {
        let mut buf = digits([1, 2, 3, 4]);
        buf[12] = 0;
        let frame = decode(buf);
        assert_eq!(frame.unit(), Err(DecodeFault::NoUnit));
        assert_eq!(frame.unit_symbol(), "");
        assert_eq!(frame.faults(), vec![DecodeFault::NoUnit]);
        assert_eq!(frame.value(), Some(1234.0));
    }

    #[test]
    fn display_matches_lcd() {
        let mut buf = digits([4, 3, 2, 1]);
        buf[1] |= 0x08;
        buf[5] |= 0x08;
        buf[9] |= 1 << 1;
        buf[11] |= 1 << 2;
        let frame = decode(buf);
        assert_eq!(frame.display_digits(), "-43.21");
        assert_eq!(frame.to_string(), "-43.21 k\u{03A9}");

        let mut buf = raw([0, SEGMENTS[0], 0b0110_1000, 0]);
        buf[5] |= 0x08;
        assert_eq!(decode(buf).display_digits(), "  0.L ");
    }
}
