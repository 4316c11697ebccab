use anyhow::Error;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// Human readable size display, used for log messages and driver info.
pub struct HumanByte {
    b: u64,
}

impl std::fmt::Display for HumanByte {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.b as f64;
        if self.b < KIB {
            write!(f, "{} B", self.b)
        } else if self.b < MIB {
            write!(f, "{:.2} KiB", b / KIB as f64)
        } else if self.b < GIB {
            write!(f, "{:.2} MiB", b / MIB as f64)
        } else if self.b < TIB {
            write!(f, "{:.2} GiB", b / GIB as f64)
        } else {
            write!(f, "{:.2} TiB", b / TIB as f64)
        }
    }
}

impl From<u64> for HumanByte {
    fn from(v: u64) -> Self {
        HumanByte { b: v }
    }
}

/// Parse a size given either in bytes or with a `k`, `m`, `g` or `t` suffix
/// (case insensitive, binary units). An empty string means zero.
pub fn parse_size(size: &str) -> Result<u64, Error> {
    let size = size.trim().to_lowercase();
    if size.is_empty() {
        return Ok(0);
    }

    let (number, unit) = match size.chars().last() {
        Some('k') => (&size[..size.len() - 1], KIB),
        Some('m') => (&size[..size.len() - 1], MIB),
        Some('g') => (&size[..size.len() - 1], GIB),
        Some('t') => (&size[..size.len() - 1], TIB),
        _ => (&size[..], 1),
    };

    let value: u64 = number
        .parse()
        .map_err(|err| volume_err!(InvalidArgument, "unable to parse size {:?} - {}", size, err))?;

    value
        .checked_mul(unit)
        .ok_or_else(|| volume_err!(InvalidArgument, "size {:?} is too large", size))
}

#[test]
fn correct_byte_convert() {
    fn convert(b: u64) -> String {
        HumanByte::from(b).to_string()
    }
    assert_eq!(convert(1023), "1023 B");
    assert_eq!(convert(1 << 10), "1.00 KiB");
    assert_eq!(convert(1 << 20), "1.00 MiB");
    assert_eq!(convert((1 << 30) + 103 * (1 << 20)), "1.10 GiB");
}

#[test]
fn test_parse_size() {
    assert_eq!(parse_size("").unwrap(), 0);
    assert_eq!(parse_size("4096").unwrap(), 4096);
    assert_eq!(parse_size("2k").unwrap(), 2048);
    assert_eq!(parse_size("10M").unwrap(), 10 * MIB);
    assert_eq!(parse_size("100G").unwrap(), 100 * GIB);
    assert_eq!(parse_size("1t").unwrap(), TIB);
    assert!(parse_size("1.5g").is_err());
    assert!(parse_size("abc").is_err());
    assert!(parse_size("99999999999t").is_err());
}
