use crate::transfer::constants::MAX_FILENAME_LENGTH;
use std::path::Path;
use tokio::fs::{File, OpenOptions};

const FALLBACK_NAME: &str = "unknown_file";

/// Characters Windows refuses in file names, on top of path separators.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

/// Open the partial download file with secure permissions (0o600 on Unix),
/// truncating anything left over from an earlier attempt.
pub async fn open_partial_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Hidden sibling a download is written to before it is renamed into place.
pub fn partial_file_name(file_name: &str) -> String {
    format!(".{}.part", file_name)
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "instant".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Reduce a file name to a single safe ASCII path component.
pub fn sanitize_file_name(file_name: &str) -> String {
    // 1. Keep only the last component, whatever the separator
    let file_name = file_name
        .split(|c| c == '/' || c == '\\')
        .next_back()
        .unwrap_or(FALLBACK_NAME);

    // 2. Transliterate to ASCII, then drop control and forbidden characters
    let mut clean_name: String = deunicode::deunicode(file_name)
        .chars()
        .filter(|c| !c.is_control() && !FORBIDDEN_CHARS.contains(c))
        .collect();
    clean_name = clean_name.trim().to_string();

    // 3. Windows reserved device names
    // See: https://learn.microsoft.com/en-us/windows/win32/fileio/naming-a-file
    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved_names.iter().any(|&r| clean_name.eq_ignore_ascii_case(r)) {
        return FALLBACK_NAME.to_string();
    }

    if clean_name.is_empty() || clean_name.chars().all(|c| c == '.') {
        return FALLBACK_NAME.to_string();
    }

    // 4. Truncate, keeping a reasonably short extension. Everything is ASCII
    // by now so byte offsets are char boundaries.
    if clean_name.len() > MAX_FILENAME_LENGTH {
        match clean_name.rfind('.') {
            Some(idx) if idx > 0 && clean_name.len() - idx < 20 => {
                let ext = clean_name[idx..].to_string();
                clean_name.truncate(MAX_FILENAME_LENGTH - ext.len());
                clean_name.push_str(&ext);
            }
            _ => clean_name.truncate(MAX_FILENAME_LENGTH),
        }
    }

    clean_name
}
