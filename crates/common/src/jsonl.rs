//! Line appends for the JSON-lines files behind memory and the recorder.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Append `line` plus a newline to a file opened with read + append.
///
/// If the file does not end in a newline (a torn write from an earlier
/// crash), the torn line is closed off first so `line` stays parseable.
/// A write that fails partway is truncated back to the previous length.
pub fn append_line(file: &mut File, line: &str) -> io::Result<()> {
    let start = file.metadata()?.len();

    let mut buf = Vec::with_capacity(line.len() + 2);
    if start > 0 && !ends_with_newline(file, start)? {
        buf.push(b'\n');
    }
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    if let Err(e) = file.write_all(&buf).and_then(|_| file.flush()) {
        // If this fails too, the newline check on the next append still
        // isolates the torn bytes.
        let _ = file.set_len(start);
        return Err(e);
    }
    Ok(())
}

fn ends_with_newline(file: &mut File, len: u64) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
