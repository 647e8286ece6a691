//! Raw chunk files: the words back to back in native byte order.

use std::io::{self, Read, Write};

pub fn write_words<W: Write>(mut out: W, words: &[u32]) -> io::Result<()> {
    for word in words {
        out.write_all(&word.to_ne_bytes())?;
    }
    out.flush()
}

pub fn read_words<R: Read>(mut input: R) -> io::Result<Vec<u32>> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} bytes is not a whole number of 4-byte words", bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
