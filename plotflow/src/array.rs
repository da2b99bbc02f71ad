//! Typed, validated views over host-supplied numeric buffers.
//!
//! The host hands in raw bytes plus a (rank ≤ 2, shape, byte-stride,
//! element-type) description. Everything is checked once at construction so
//! the per-element accessors on the hot paths stay branch-light and safe.

use std::sync::Arc;

use thiserror::Error;

/// Element type codes accepted from the host.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ElementType {
    pub fn size_bytes(self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::I8 => "i8",
            ElementType::U8 => "u8",
            ElementType::I16 => "i16",
            ElementType::U16 => "u16",
            ElementType::I32 => "i32",
            ElementType::U32 => "u32",
            ElementType::I64 => "i64",
            ElementType::U64 => "u64",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }
}

/// Validation failures surfaced to the host before any worker touches data.
#[derive(Debug, Error)]
pub enum ArrayError {
    #[error("{name}: element type {ty} is not allowed for this argument")]
    TypeNotAllowed { name: &'static str, ty: &'static str },

    #[error("{name}: supports at most 2 dimensions (given {rank})")]
    RankTooHigh { name: &'static str, rank: usize },

    #[error("{name}: shape and strides must have equal rank")]
    RankMismatch { name: &'static str },

    #[error("{name}: buffer too big ({elems} elements)")]
    SizeOverflow { name: &'static str, elems: i64 },

    #[error("{name}: stride too big ({stride} bytes)")]
    StrideOverflow { name: &'static str, stride: i64 },

    #[error("{name}: {len}-byte buffer too small for its shape and strides")]
    OutOfBounds { name: &'static str, len: usize },

    #[error("{name}: invalid value {value} - must be in [0, {limit})")]
    IndexOutOfRange {
        name: &'static str,
        value: i64,
        limit: i64,
    },
}

/// An immutable 2-D (or lower-rank) strided numeric array.
///
/// Lower-rank inputs are normalized right-aligned: a 1-D buffer of length n
/// becomes shape (1, n). Cloning is cheap; the bytes are shared.
#[derive(Clone)]
pub struct DataArray {
    name: &'static str,
    data: Arc<[u8]>,
    ty: ElementType,
    shape: [i32; 2],
    strides: [i32; 2], // bytes
}

impl DataArray {
    /// Builds and validates an array view. `shape` and `strides` (in bytes)
    /// must have equal length, at most 2.
    pub fn new(
        name: &'static str,
        data: impl Into<Arc<[u8]>>,
        ty: ElementType,
        shape: &[i64],
        strides: &[i64],
    ) -> Result<DataArray, ArrayError> {
        let data: Arc<[u8]> = data.into();
        let rank = shape.len();
        if rank > 2 {
            return Err(ArrayError::RankTooHigh { name, rank });
        }
        if strides.len() != rank {
            return Err(ArrayError::RankMismatch { name });
        }

        let elems: i64 = shape.iter().product::<i64>().max(1);
        if elems > i32::MAX as i64 {
            return Err(ArrayError::SizeOverflow { name, elems });
        }

        let mut shape2 = [1i32; 2];
        let mut strides2 = [0i32; 2];
        for d in 0..rank {
            let dst = d + 2 - rank;
            if shape[d] < 0 || shape[d] > i32::MAX as i64 {
                return Err(ArrayError::SizeOverflow {
                    name,
                    elems: shape[d],
                });
            }
            if strides[d] < i32::MIN as i64 || strides[d] > i32::MAX as i64 {
                return Err(ArrayError::StrideOverflow {
                    name,
                    stride: strides[d],
                });
            }
            shape2[dst] = shape[d] as i32;
            strides2[dst] = strides[d] as i32;
        }

        let arr = DataArray {
            name,
            data,
            ty,
            shape: shape2,
            strides: strides2,
        };
        arr.check_bounds()?;
        Ok(arr)
    }

    /// Every addressable element must fall inside the byte buffer; with the
    /// base at offset zero this also rejects negative strides.
    fn check_bounds(&self) -> Result<(), ArrayError> {
        if self.shape[0] == 0 || self.shape[1] == 0 {
            return Ok(());
        }
        let mut lo: i64 = 0;
        let mut hi: i64 = 0;
        for d in 0..2 {
            let span = self.strides[d] as i64 * (self.shape[d] as i64 - 1);
            if span < 0 {
                lo += span;
            } else {
                hi += span;
            }
        }
        if lo < 0 || (hi as usize) + self.ty.size_bytes() > self.data.len() {
            return Err(ArrayError::OutOfBounds {
                name: self.name,
                len: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn element_type(&self) -> ElementType {
        self.ty
    }

    pub fn shape(&self) -> [i32; 2] {
        self.shape
    }

    /// Rejects float element types (start-index buffers).
    pub fn ensure_integer(&self) -> Result<(), ArrayError> {
        if self.ty.is_float() {
            return Err(ArrayError::TypeNotAllowed {
                name: self.name,
                ty: self.ty.name(),
            });
        }
        Ok(())
    }

    /// Color buffers accept u8 bytes or floats in [0, 1].
    pub fn ensure_color(&self) -> Result<(), ArrayError> {
        match self.ty {
            ElementType::U8 | ElementType::F32 | ElementType::F64 => Ok(()),
            other => Err(ArrayError::TypeNotAllowed {
                name: self.name,
                ty: other.name(),
            }),
        }
    }

    #[inline]
    fn offset(&self, i: i32, j: i32) -> usize {
        debug_assert!(i >= 0 && i < self.shape[0] && j >= 0 && j < self.shape[1]);
        (i as i64 * self.strides[0] as i64 + j as i64 * self.strides[1] as i64) as usize
    }

    /// Element value widened to f64.
    #[inline]
    pub fn value(&self, i: i32, j: i32) -> f64 {
        let o = self.offset(i, j);
        let b = &self.data[o..];
        match self.ty {
            ElementType::I8 => b[0] as i8 as f64,
            ElementType::U8 => b[0] as f64,
            ElementType::I16 => i16::from_ne_bytes([b[0], b[1]]) as f64,
            ElementType::U16 => u16::from_ne_bytes([b[0], b[1]]) as f64,
            ElementType::I32 => i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64,
            ElementType::U32 => u32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64,
            ElementType::I64 => {
                i64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64
            }
            ElementType::U64 => {
                u64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64
            }
            ElementType::F32 => f32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64,
            ElementType::F64 => {
                f64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
        }
    }

    /// Element mapped through `x -> a·x + b`, in f32 like the rasterizer.
    #[inline]
    pub fn get_transformed(&self, i: i32, j: i32, a: f32, b: f32) -> f32 {
        a * self.value(i, j) as f32 + b
    }

    /// One color channel: integer types are taken as-is (mod 256), floats
    /// are clamped to [0, 1] and scaled.
    #[inline]
    pub fn get_color(&self, i: i32, j: i32) -> u8 {
        let v = self.value(i, j);
        if self.ty.is_float() {
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        } else {
            v as i64 as u8
        }
    }

    /// RGB color row packed as 0xAARRGGBB with full alpha.
    pub fn get_argb(&self, row: i32) -> u32 {
        let r = self.get_color(row, 0) as u32;
        let g = self.get_color(row, 1) as u32;
        let b = self.get_color(row, 2) as u32;
        0xff00_0000 | (r << 16) | (g << 8) | b
    }

    /// Integer element checked against `[0, limit)`.
    pub fn get_index(&self, i: i32, j: i32, limit: i64) -> Result<i64, ArrayError> {
        let v = self.value(i, j) as i64;
        if v < 0 || v >= limit {
            return Err(ArrayError::IndexOutOfRange {
                name: self.name,
                value: v,
                limit,
            });
        }
        Ok(v)
    }

    /// Min and max over all elements, skipping NaN. All-NaN (or empty) data
    /// yields a NaN pair.
    pub fn minmax(&self) -> (f64, f64) {
        let mut lo = f64::NAN;
        let mut hi = f64::NAN;
        for i in 0..self.shape[0] {
            for j in 0..self.shape[1] {
                let v = self.value(i, j);
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
        (lo, hi)
    }

    // ---- convenience constructors (contiguous row-major) ----

    pub fn from_f64(
        name: &'static str,
        vals: &[f64],
        shape: &[i64],
    ) -> Result<DataArray, ArrayError> {
        let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::new(name, bytes, ElementType::F64, shape, &contiguous(shape, 8))
    }

    pub fn from_f32(
        name: &'static str,
        vals: &[f32],
        shape: &[i64],
    ) -> Result<DataArray, ArrayError> {
        let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::new(name, bytes, ElementType::F32, shape, &contiguous(shape, 4))
    }

    pub fn from_u8(
        name: &'static str,
        vals: &[u8],
        shape: &[i64],
    ) -> Result<DataArray, ArrayError> {
        Self::new(
            name,
            vals.to_vec(),
            ElementType::U8,
            shape,
            &contiguous(shape, 1),
        )
    }

    pub fn from_i64(
        name: &'static str,
        vals: &[i64],
        shape: &[i64],
    ) -> Result<DataArray, ArrayError> {
        let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::new(name, bytes, ElementType::I64, shape, &contiguous(shape, 8))
    }
}

fn contiguous(shape: &[i64], elem: i64) -> Vec<i64> {
    let mut strides = vec![0i64; shape.len()];
    let mut acc = elem;
    for d in (0..shape.len()).rev() {
        strides[d] = acc;
        acc *= shape[d].max(1);
    }
    strides
}
