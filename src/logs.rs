use std::io::{self, BufRead, ErrorKind, Write};

/// Copies raw log lines from `source` to `out` until the source ends.
///
/// Each line is flushed as soon as it is written so a follower sees output
/// immediately. A closed output (for example `relayctl logs | head`) ends the
/// pump quietly.
///
/// # Arguments
/// * `source` - The log stream to read.
/// * `out` - Where lines are written.
///
/// # Returns
/// * The number of lines copied.
pub fn pump<R: BufRead, W: Write + ?Sized>(source: R, out: &mut W) -> io::Result<u64> {
    let mut copied = 0;
    for line in source.lines() {
        let line = line?;
        let written = writeln!(out, "{line}").and_then(|_| out.flush());
        match written {
            Ok(()) => copied += 1,
            Err(err) if err.kind() == ErrorKind::BrokenPipe => break,
            Err(err) => return Err(err),
        }
    }
    Ok(copied)
}
