//! Parsers for the text emitted by `free`, `swapon` and `df`.
//!
//! Kept apart from the reconciler so format coupling stays inside the
//! gateway.

use std::path::PathBuf;

use crate::types::{bytes_to_mb, MemStats, MemorySnapshot, SwapSlot, SwapStats};

/// Parse `free -b` output.
pub fn parse_free_bytes(output: &str) -> Result<MemorySnapshot, String> {
    let mut mem = None;
    let mut swap = None;

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.first() {
            Some(&"Mem:") if fields.len() >= 7 => {
                let v = parse_numbers(&fields[1..7])?;
                mem = Some(MemStats {
                    total: bytes_to_mb(v[0]),
                    used: bytes_to_mb(v[1]),
                    free: bytes_to_mb(v[2]),
                    shared: bytes_to_mb(v[3]),
                    buff_cache: bytes_to_mb(v[4]),
                    available: bytes_to_mb(v[5]),
                });
            }
            Some(&"Swap:") if fields.len() >= 4 => {
                let v = parse_numbers(&fields[1..4])?;
                swap = Some(SwapStats {
                    total: bytes_to_mb(v[0]),
                    used: bytes_to_mb(v[1]),
                    free: bytes_to_mb(v[2]),
                });
            }
            _ => {}
        }
    }

    match (mem, swap) {
        (Some(mem), Some(swap)) => Ok(MemorySnapshot { mem, swap }),
        (None, _) => Err("missing Mem: row".to_string()),
        (_, None) => Err("missing Swap: row".to_string()),
    }
}

/// Parse `swapon --show=NAME,TYPE,SIZE,USED,PRIO --bytes --noheadings --raw`.
///
/// No output at all means no swap is active.
pub fn parse_swapon_raw(output: &str) -> Result<Vec<SwapSlot>, String> {
    let mut slots = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 4 {
            return Err(format!("short swap row: {line:?}"));
        }
        let size = fields[2]
            .parse::<u64>()
            .map_err(|e| format!("bad SIZE {:?}: {e}", fields[2]))?;
        let used = fields[3]
            .parse::<u64>()
            .map_err(|e| format!("bad USED {:?}: {e}", fields[3]))?;
        slots.push(SwapSlot::active(
            PathBuf::from(unescape_raw(fields[0])),
            size,
            used,
        ));
    }
    Ok(slots)
}

/// Parse `df -B1 --output=avail <path>`: a header line then one number.
pub fn parse_df_avail(output: &str) -> Result<u64, String> {
    let value = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .nth(1)
        .ok_or_else(|| "missing value row".to_string())?;
    value
        .parse::<u64>()
        .map_err(|e| format!("bad avail {value:?}: {e}"))
}

fn parse_numbers(fields: &[&str]) -> Result<Vec<u64>, String> {
    fields
        .iter()
        .map(|f| f.parse::<u64>().map_err(|e| format!("bad number {f:?}: {e}")))
        .collect()
}

/// Undo util-linux `--raw` escaping (`\x20` and friends).
fn unescape_raw(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREE_OUTPUT: &str = "\
               total        used        free      shared  buff/cache   available
Mem:     8388608000  4194304000  1048576000    10485760  3145728000  3984588800
Swap:    2000000000   524288000  1475712000
";

    #[test]
    fn test_parse_free_bytes() {
        let snap = parse_free_bytes(FREE_OUTPUT).unwrap();
        assert!((snap.mem.total - 8000.0).abs() < 0.01);
        assert!((snap.mem.free - 1000.0).abs() < 0.01);
        assert!((snap.swap.used - 500.0).abs() < 0.01);
        assert!((snap.swap.total - 1907.35).abs() < 0.01);
    }

    #[test]
    fn test_parse_free_missing_swap_row() {
        let out = "              total\nMem: 1 2 3 4 5 6\n";
        assert!(parse_free_bytes(out).unwrap_err().contains("Swap"));
    }

    #[test]
    fn test_parse_free_rejects_garbage_numbers() {
        let out = "Mem: 1 2 x 4 5 6\nSwap: 1 2 3\n";
        assert!(parse_free_bytes(out).is_err());
    }

    #[test]
    fn test_parse_swapon_rows() {
        let out = "\
/swapFolder/swapfile0 file 999993344 1048576 -2
/dev/sda2 partition 4294963200 0 -3
";
        let slots = parse_swapon_raw(out).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].name, "swapfile0");
        assert_eq!(slots[0].size_bytes, 999_993_344);
        assert_eq!(slots[0].used_bytes, 1_048_576);
        assert!(slots[0].active);
        assert_eq!(slots[1].path, PathBuf::from("/dev/sda2"));
    }

    #[test]
    fn test_parse_swapon_empty_means_no_swap() {
        assert!(parse_swapon_raw("").unwrap().is_empty());
        assert!(parse_swapon_raw("\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_swapon_unescapes_spaces() {
        let slots = parse_swapon_raw("/mnt/my\\x20disk/swap file 100 0 -2\n").unwrap();
        assert_eq!(slots[0].path, PathBuf::from("/mnt/my disk/swap"));
    }

    #[test]
    fn test_parse_df_avail() {
        assert_eq!(parse_df_avail("     Avail\n53687091200\n").unwrap(), 53_687_091_200);
        assert!(parse_df_avail("Avail\n").is_err());
    }
}
