// Copyright © 2017 Cormac O'Brien
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use std::io;
use std::io::BufRead;

use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

/// Reads a NUL-terminated byte string, consuming the terminator.
///
/// Demo text is not guaranteed to be UTF-8 (Quake uses high-bit glyphs for
/// colored text), so strings stay as raw bytes end to end.
pub fn read_cstring<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: BufRead + ReadBytesExt,
{
    let mut bytes = Vec::new();
    loop {
        let byte = reader.read_u8()?;
        if byte == 0 {
            return Ok(bytes);
        }
        bytes.push(byte);
    }
}

/// Writes a byte string followed by a NUL terminator.
pub fn write_cstring<W>(writer: &mut W, string: &[u8]) -> io::Result<()>
where
    W: WriteBytesExt,
{
    writer.write_all(string)?;
    writer.write_u8(0)?;
    Ok(())
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Whether `haystack` contains `needle`.
pub fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    find_subslice(haystack, needle).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    #[test]
    fn test_cstring_round_trip() {
        let mut buf = Vec::new();
        write_cstring(&mut buf, b"maps/e1m1.bsp").unwrap();
        assert_eq!(buf.last(), Some(&0));

        let mut curs = Cursor::new(buf);
        assert_eq!(read_cstring(&mut curs).unwrap(), b"maps/e1m1.bsp".to_vec());
    }

    #[test]
    fn test_cstring_high_bit_bytes_survive() {
        let raw: &[u8] = &[b'Y', 0xef, 0xf5, b'!'];
        let mut buf = Vec::new();
        write_cstring(&mut buf, raw).unwrap();
        let mut curs = Cursor::new(buf);
        assert_eq!(read_cstring(&mut curs).unwrap(), raw.to_vec());
    }

    #[test]
    fn test_cstring_unterminated_is_eof() {
        let mut curs = Cursor::new(b"no terminator".to_vec());
        let err = read_cstring(&mut curs).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_find_subslice() {
        assert_eq!(find_subslice(b"You get 5 shells\n", b"5 shells"), Some(8));
        assert_eq!(find_subslice(b"abc", b"d"), None);
        assert_eq!(find_subslice(b"abc", b""), Some(0));
        assert!(contains_subslice(b"weapons/lock4.wav", b"lock4"));
    }
}
