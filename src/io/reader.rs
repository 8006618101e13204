use std::io::{BufRead, ErrorKind};

use ndarray::{Array1, Array2};

use crate::{NnetErr, Result};

/// Reads back the token stream written by a `TokenWriter`.
pub struct TokenReader<R: BufRead> {
    inner: R,
    binary: bool,
}

impl<R: BufRead> TokenReader<R> {
    /// Creates a new `TokenReader`.
    ///
    /// # Arguments
    /// * `inner` - The source.
    /// * `binary` - Whether the source uses the binary encoding.
    pub fn new(inner: R, binary: bool) -> Self {
        Self { inner, binary }
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        loop {
            match self.inner.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.inner.consume(1);
        }

        Ok(byte)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => NnetErr::parse("unexpected end of stream"),
            _ => e.into(),
        })
    }

    fn skip_whitespace(&mut self) -> Result<()> {
        while let Some(byte) = self.peek_byte()? {
            if !byte.is_ascii_whitespace() {
                break;
            }
            self.inner.consume(1);
        }

        Ok(())
    }

    /// Returns `true` once nothing but whitespace is left in the stream.
    pub fn at_eof(&mut self) -> Result<bool> {
        self.skip_whitespace()?;
        Ok(self.peek_byte()?.is_none())
    }

    /// Reads a single whitespace delimited token.
    pub fn read_token(&mut self) -> Result<String> {
        if !self.binary {
            self.skip_whitespace()?;
        }

        let mut token = Vec::new();
        while let Some(byte) = self.next_byte()? {
            if byte.is_ascii_whitespace() {
                break;
            }
            token.push(byte);
        }

        if token.is_empty() {
            return Err(NnetErr::parse("unexpected end of stream while reading a token"));
        }

        String::from_utf8(token).map_err(|e| NnetErr::parse(format!("non utf-8 token: {e}")))
    }

    /// Reads a token and fails unless it is `expected`.
    pub fn expect_token(&mut self, expected: &str) -> Result<()> {
        let token = self.read_token()?;
        if token != expected {
            return Err(NnetErr::parse(format!("expected token {expected}, got {token}")));
        }

        Ok(())
    }

    /// Returns `true` if the next non-whitespace character opens a token like `<Marker>`,
    /// without consuming anything but the whitespace.
    pub fn peek_marker(&mut self) -> Result<bool> {
        if !self.binary {
            self.skip_whitespace()?;
        }

        Ok(self.peek_byte()? == Some(b'<'))
    }

    pub fn read_int(&mut self) -> Result<usize> {
        let value = if self.binary {
            i32::from_le_bytes(self.read_sized::<4>()?)
        } else {
            let token = self.read_token()?;
            token
                .parse::<i32>()
                .map_err(|_| NnetErr::parse(format!("expected an integer, got {token}")))?
        };

        usize::try_from(value).map_err(|_| NnetErr::parse(format!("negative size {value}")))
    }

    pub fn read_float(&mut self) -> Result<f32> {
        if self.binary {
            return Ok(f32::from_le_bytes(self.read_sized::<4>()?));
        }

        let token = self.read_token()?;
        token
            .parse::<f32>()
            .map_err(|_| NnetErr::parse(format!("expected a float, got {token}")))
    }

    fn read_sized<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut size = [0u8];
        self.read_exact(&mut size)?;
        if size[0] as usize != N {
            return Err(NnetErr::parse(format!(
                "expected a {N} byte number, got size marker {}",
                size[0]
            )));
        }

        let mut raw = [0u8; N];
        self.read_exact(&mut raw)?;
        Ok(raw)
    }

    fn read_payload(&mut self, len: usize) -> Result<Vec<f32>> {
        let mut raw = vec![0u8; len * size_of::<f32>()];
        self.read_exact(&mut raw)?;
        Ok(bytemuck::pod_collect_to_vec(&raw))
    }

    fn read_bracketed(&mut self, len: usize, what: &'static str) -> Result<Vec<f32>> {
        self.expect_token("[")?;
        let mut data = Vec::with_capacity(len);
        loop {
            let token = self.read_token()?;
            if token == "]" {
                break;
            }

            let x = token
                .parse::<f32>()
                .map_err(|_| NnetErr::parse(format!("expected a float in {what}, got {token}")))?;
            data.push(x);
        }

        if data.len() != len {
            return Err(NnetErr::SizeMismatch {
                what,
                got: data.len(),
                expected: len,
            });
        }

        Ok(data)
    }

    /// Reads a matrix that must have the shape `(rows, cols)`.
    pub fn read_matrix(&mut self, rows: usize, cols: usize) -> Result<Array2<f32>> {
        let data = if self.binary {
            self.expect_token("FM")?;
            let got_rows = self.read_int()?;
            let got_cols = self.read_int()?;
            if (got_rows, got_cols) != (rows, cols) {
                return Err(NnetErr::SizeMismatch {
                    what: "matrix elements",
                    got: got_rows * got_cols,
                    expected: rows * cols,
                });
            }
            self.read_payload(rows * cols)?
        } else {
            self.read_bracketed(rows * cols, "matrix elements")?
        };

        Array2::from_shape_vec((rows, cols), data).map_err(|e| NnetErr::parse(e.to_string()))
    }

    /// Reads a vector that must have length `len`.
    pub fn read_vector(&mut self, len: usize) -> Result<Array1<f32>> {
        let data = if self.binary {
            self.expect_token("FV")?;
            let got = self.read_int()?;
            if got != len {
                return Err(NnetErr::SizeMismatch {
                    what: "vector elements",
                    got,
                    expected: len,
                });
            }
            self.read_payload(len)?
        } else {
            self.read_bracketed(len, "vector elements")?
        };

        Ok(Array1::from(data))
    }
}
