/*
 * tar.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Collaudo, a remote test agent.
 *
 * Collaudo is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Collaudo is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Collaudo.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Streaming ustar writer and reader.
//!
//! 512-byte blocks; octal fields are zero-padded with a space terminator;
//! the checksum is the byte sum of the header with the checksum field read
//! as eight spaces. The writer emits regular files only (typeflag '0', mode
//! 0666, uid/gid 0) and does not split long names into the prefix field; the
//! reader accepts prefixed names and joins them with `/`. Entry content is a
//! view limited to the entry size; whatever the caller leaves unread is
//! discarded before the next header.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

const BLOCK: u64 = 512;

/// Two zero blocks: the end-of-archive marker.
static EMPTY_BLOCKS: [u8; 1024] = [0u8; 1024];

/// Zero-padded octal with a trailing space, the ustar number encoding.
fn write_oct(field: &mut [u8], mut value: u64) {
    let mut i = field.len() - 1;
    field[i] = b' ';
    while i > 0 {
        i -= 1;
        field[i] = b'0' + (value & 7) as u8;
        value >>= 3;
    }
}

fn load_oct(field: &[u8]) -> io::Result<u64> {
    let bad = || io::Error::new(io::ErrorKind::InvalidData, "bad number in tar header");
    match field.first() {
        Some(b) if (b'0'..=b'7').contains(b) => {}
        _ => return Err(bad()),
    }
    let mut value = 0u64;
    for &b in field {
        if b == b' ' || b == 0 {
            break;
        }
        if !(b'0'..=b'7').contains(&b) {
            return Err(bad());
        }
        value = value * 8 + (b - b'0') as u64;
    }
    Ok(value)
}

fn padding_for(size: u64) -> u64 {
    (BLOCK - size % BLOCK) % BLOCK
}

/// Writes a ustar archive into any byte stream.
pub struct TarWriter<W> {
    out: W,
}

impl<W: AsyncWrite + Unpin> TarWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Append one regular file: header, exactly `size` bytes drained from
    /// `content`, zero padding to the next block boundary. Content that ends
    /// before `size` bytes is an `UnexpectedEof` error.
    pub async fn add<R>(&mut self, name: &str, size: u64, mtime: u64, content: &mut R) -> io::Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if name.len() > 100 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tar name too long"));
        }

        let mut header = [0u8; 512];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[100..107].copy_from_slice(b"000666 ");
        header[108..115].copy_from_slice(b"000000 ");
        header[116..123].copy_from_slice(b"000000 ");
        write_oct(&mut header[124..136], size);
        write_oct(&mut header[136..148], mtime);
        header[156] = b'0';
        header[257..265].copy_from_slice(b"ustar\x0000");
        let sum = header.iter().map(|&b| b as u64).sum::<u64>() + 8 * 0x20;
        write_oct(&mut header[148..156], sum);
        self.out.write_all(&header).await?;

        let mut buf = vec![0u8; 16 * 1024];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = content.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "tar entry content ended early",
                ));
            }
            self.out.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }

        let padding = padding_for(size) as usize;
        if padding > 0 {
            self.out.write_all(&EMPTY_BLOCKS[..padding]).await?;
        }
        Ok(())
    }

    /// Emit the end-of-archive marker and shut the output stream down.
    pub async fn close(self) -> io::Result<W> {
        let Self { mut out } = self;
        out.write_all(&EMPTY_BLOCKS).await?;
        out.shutdown().await?;
        Ok(out)
    }
}

/// Reads a ustar archive from any byte stream, one entry at a time.
#[derive(Debug)]
pub struct TarReader<R> {
    src: R,
    /// Unread content bytes of the current entry.
    remaining: u64,
    /// Padding after the current entry's content.
    padding: u64,
}

/// One archive entry. Reading it yields the entry content, at most `size`
/// bytes; end-of-stream afterwards.
#[derive(Debug)]
pub struct TarEntry<'a, R> {
    pub name: String,
    pub size: u64,
    owner: &'a mut TarReader<R>,
}

impl<R: AsyncRead + Unpin> TarReader<R> {
    pub fn new(src: R) -> Self {
        Self {
            src,
            remaining: 0,
            padding: 0,
        }
    }

    /// Advance to the next entry, discarding whatever the previous entry
    /// left unread. `None` at the end-of-archive marker.
    pub async fn next(&mut self) -> io::Result<Option<TarEntry<'_, R>>> {
        let mut skip = self.remaining + self.padding;
        if skip > 0 {
            let mut scratch = vec![0u8; 8 * 1024];
            while skip > 0 {
                let want = skip.min(scratch.len() as u64) as usize;
                let n = self.src.read(&mut scratch[..want]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "tar stream ended inside an entry",
                    ));
                }
                skip -= n as u64;
            }
            self.remaining = 0;
            self.padding = 0;
        }

        let mut header = [0u8; 512];
        self.src.read_exact(&mut header).await?;

        if header.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        if &header[257..262] != b"ustar" {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad tar magic"));
        }

        let expected = load_oct(&header[148..156])?;
        let actual = header
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { 0x20 } else { b as u64 })
            .sum::<u64>();
        if actual != expected {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad tar checksum"));
        }

        let field_str = |field: &[u8]| -> io::Result<String> {
            let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
            String::from_utf8(field[..len].to_vec())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "tar name is not UTF-8"))
        };

        let mut name = field_str(&header[345..500])?;
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(&field_str(&header[..100])?);

        let size = load_oct(&header[124..136])?;
        self.remaining = size;
        self.padding = padding_for(size);

        Ok(Some(TarEntry {
            name,
            size,
            owner: self,
        }))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TarEntry<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.owner.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let want = this.owner.remaining.min(buf.remaining() as u64) as usize;
        let mut rb = ReadBuf::new(buf.initialize_unfilled_to(want));
        ready!(Pin::new(&mut this.owner.src).poll_read(cx, &mut rb))?;
        let n = rb.filled().len();
        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "tar stream ended inside an entry",
            )));
        }
        this.owner.remaining -= n as u64;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}
