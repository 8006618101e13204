use std::io::Write;

use ndarray::{Array1, Array2};

use crate::Result;

/// Writes the token stream every persisted network is made of.
///
/// The same calls produce either the human readable or the compact encoding
/// depending on the `binary` flag given at construction.
pub struct TokenWriter<W: Write> {
    inner: W,
    binary: bool,
}

impl<W: Write> TokenWriter<W> {
    /// Creates a new `TokenWriter`.
    ///
    /// # Arguments
    /// * `inner` - The sink.
    /// * `binary` - Whether to use the binary encoding.
    pub fn new(inner: W, binary: bool) -> Self {
        Self { inner, binary }
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn write_token(&mut self, token: &str) -> Result<()> {
        self.inner.write_all(token.as_bytes())?;
        self.inner.write_all(b" ")?;
        Ok(())
    }

    pub fn write_int(&mut self, value: usize) -> Result<()> {
        if self.binary {
            self.inner.write_all(&[4])?;
            self.inner.write_all(&(value as i32).to_le_bytes())?;
        } else {
            write!(self.inner, "{value} ")?;
        }

        Ok(())
    }

    pub fn write_float(&mut self, value: f32) -> Result<()> {
        if self.binary {
            self.inner.write_all(&[4])?;
            self.inner.write_all(&value.to_le_bytes())?;
        } else {
            write!(self.inner, "{value} ")?;
        }

        Ok(())
    }

    /// Writes a matrix, in text mode each row goes on its own line.
    pub fn write_matrix(&mut self, mat: &Array2<f32>) -> Result<()> {
        if self.binary {
            self.write_token("FM")?;
            self.write_int(mat.nrows())?;
            self.write_int(mat.ncols())?;
            let data = mat.as_standard_layout();
            let raw = data.as_slice().unwrap_or_default();
            self.inner.write_all(bytemuck::cast_slice(raw))?;
            return Ok(());
        }

        if mat.is_empty() {
            writeln!(self.inner, " [ ]")?;
            return Ok(());
        }

        write!(self.inner, " [")?;
        for row in mat.rows() {
            write!(self.inner, "\n ")?;
            for x in row {
                write!(self.inner, " {x}")?;
            }
            write!(self.inner, " ")?;
        }
        writeln!(self.inner, "]")?;
        Ok(())
    }

    pub fn write_vector(&mut self, vec: &Array1<f32>) -> Result<()> {
        if self.binary {
            self.write_token("FV")?;
            self.write_int(vec.len())?;
            let data = vec.as_standard_layout();
            let raw = data.as_slice().unwrap_or_default();
            self.inner.write_all(bytemuck::cast_slice(raw))?;
            return Ok(());
        }

        write!(self.inner, " [")?;
        for x in vec {
            write!(self.inner, " {x}")?;
        }
        writeln!(self.inner, " ]")?;
        Ok(())
    }

    /// Ends a line in text mode, a no-op in binary mode.
    pub fn newline(&mut self) -> Result<()> {
        if !self.binary {
            writeln!(self.inner)?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
