//! Core tensor data structures and element-wise helpers.
//!
//! # Tensors
//!
//! A [`Tensor`] is a shape plus a flat, row-major buffer. Everything the
//! autodiff tape and the optimizers touch is a `Tensor<f64>`; the generic
//! parameter only exists so shape bookkeeping does not care about the element.
//!
//! It supports:
//! - Construction of N-dimensional tensors, scalars (shape `[]`) and vectors
//! - Element-wise maps with scalar broadcasting (large buffers map on `rayon`)
//! - Console printing in the same layout a browser console shows
//! - Parsing tensor data from nested JSON arrays or literals
//!
//! ## Limitations
//! - Row-major only
//! - Broadcasting is limited to single-element tensors against anything
//!
//! ## Example
//!
//! ```rust
//! use web_optimizer::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

use crate::error::{Error, Result};
use core::fmt;
use rayon::prelude::*;

/// Buffers at least this long are mapped in parallel.
const PAR_THRESHOLD: usize = 1 << 12;

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - `shape` defines the structure, e.g. `[2, 3]` for a 2×3 matrix; `[]` is a scalar.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Fallible twin of [`Tensor::new`].
    ///
    /// # Errors
    /// Returns [`Error::ShapeData`] when the shape product and data length differ.
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        if shape.iter().product::<usize>() != data.len() {
            return Err(Error::ShapeData {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// A zero-dimensional tensor holding one value.
    pub fn scalar(value: T) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// A one-dimensional tensor of `values.len()` elements.
    pub fn vector(values: impl Into<Vec<T>>) -> Self {
        let data = values.into();
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the tensor has shape `[]`.
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Replaces this tensor's data with another tensor of the same shape.
    ///
    /// # Panics
    /// Panics if shapes do not match.
    pub fn update(&mut self, mut other: Tensor<T>) {
        assert_eq!(self.shape, other.shape, "shape mismatch");
        core::mem::swap(&mut self.data, &mut other.data);
    }
}

impl<T: Copy> Tensor<T> {
    /// A tensor of `shape` with every element set to `value`.
    pub fn full(shape: impl Into<Vec<usize>>, value: T) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![value; len],
        }
    }

    /// The value of a single-element tensor (any shape with one element).
    ///
    /// # Errors
    /// Returns [`Error::NotScalar`] when the tensor holds more or fewer than one element.
    pub fn item(&self) -> Result<T> {
        match self.data.as_slice() {
            [value] => Ok(*value),
            _ => Err(Error::NotScalar(self.shape.clone())),
        }
    }
}

impl Tensor<f64> {
    /// All zeros.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        Self::full(shape, 0.0)
    }

    /// All ones.
    pub fn ones(shape: impl Into<Vec<usize>>) -> Self {
        Self::full(shape, 1.0)
    }

    /// Zeros with the shape of `self`.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape.clone())
    }

    /// Applies `f` to every element.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        let data = if self.len() >= PAR_THRESHOLD {
            self.data.par_iter().map(|&x| f(x)).collect()
        } else {
            self.data.iter().map(|&x| f(x)).collect()
        };
        Self {
            shape: self.shape.clone(),
            data,
        }
    }

    /// Combines two tensors element-wise.
    ///
    /// Shapes must match, or one side must hold a single element, which is
    /// then broadcast against the other.
    ///
    /// # Panics
    /// Panics if the shapes cannot be broadcast together.
    pub fn zip_map<F>(&self, other: &Self, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
    {
        let Some(shape) = broadcast_shape(&self.shape, self.len(), &other.shape, other.len())
        else {
            panic!(
                "shapes {:?} and {:?} cannot be broadcast together",
                self.shape, other.shape
            );
        };

        let len: usize = shape.iter().product();
        let lhs = |i: usize| if self.len() == 1 { self.data[0] } else { self.data[i] };
        let rhs = |i: usize| if other.len() == 1 { other.data[0] } else { other.data[i] };

        let data = if len >= PAR_THRESHOLD {
            (0..len).into_par_iter().map(|i| f(lhs(i), rhs(i))).collect()
        } else {
            (0..len).map(|i| f(lhs(i), rhs(i))).collect()
        };
        Self { shape, data }
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f64 {
        if self.len() >= PAR_THRESHOLD {
            self.data.par_iter().sum()
        } else {
            self.data.iter().sum()
        }
    }

    /// Folds a broadcast gradient back onto `shape`.
    ///
    /// A gradient that already has `shape` is returned as-is; a gradient for a
    /// broadcast single-element operand is summed.
    pub(crate) fn reduce_to(self, shape: &[usize]) -> Self {
        if self.shape == shape {
            self
        } else {
            Self::new(shape.to_vec(), vec![self.sum()])
        }
    }
}

fn broadcast_shape(a: &[usize], a_len: usize, b: &[usize], b_len: usize) -> Option<Vec<usize>> {
    if a == b {
        Some(a.to_vec())
    } else if a_len == 1 {
        Some(b.to_vec())
    } else if b_len == 1 {
        Some(a.to_vec())
    } else {
        None
    }
}

impl From<f64> for Tensor<f64> {
    fn from(value: f64) -> Self {
        Self::scalar(value)
    }
}

impl From<Vec<f64>> for Tensor<f64> {
    fn from(values: Vec<f64>) -> Self {
        Self::vector(values)
    }
}

/// Prints the tensor the way a browser console prints one:
///
/// ```text
/// Tensor
///     [4, 6]
/// ```
impl<T: fmt::Display> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tensor")?;
        write!(f, "    ")?;
        if self.shape.is_empty() {
            return match self.data.first() {
                Some(v) => write!(f, "{v}"),
                None => Ok(()),
            };
        }
        write_nested(f, &self.shape, &self.data, 5)
    }
}

fn write_nested<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    shape: &[usize],
    data: &[T],
    indent: usize,
) -> fmt::Result {
    write!(f, "[")?;
    if let [_] = shape {
        for (i, v) in data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
    } else {
        let stride: usize = shape[1..].iter().product();
        for i in 0..shape[0] {
            if i > 0 {
                write!(f, ",\n{:indent$}", "")?;
            }
            let chunk = &data[i * stride..(i + 1) * stride];
            write_nested(f, &shape[1..], chunk, indent + 1)?;
        }
    }
    write!(f, "]")
}

/// A container for tracking gradients of values (used in autograd).
///
/// Typically used as `WithGrad<Tensor<f64>>`.
#[derive(Debug, Clone, PartialEq)]
pub struct WithGrad<T> {
    pub value: T,
    pub grad: T,
}

impl WithGrad<Tensor<f64>> {
    /// Wraps `value` with a zeroed gradient of the same shape.
    pub fn new(value: Tensor<f64>) -> Self {
        let grad = value.zeros_like();
        Self { value, grad }
    }

    /// Adds `grad` into the accumulated gradient.
    ///
    /// # Panics
    /// Panics if `grad` is not shaped like the value.
    pub fn accumulate(&mut self, grad: &Tensor<f64>) {
        assert_eq!(self.grad.shape, grad.shape, "gradient shape mismatch");
        for (acc, g) in self.grad.data.iter_mut().zip(&grad.data) {
            *acc += *g;
        }
    }

    /// Resets the accumulated gradient to zero.
    pub fn zero_grad(&mut self) {
        self.grad.data.iter_mut().for_each(|g| *g = 0.0);
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use web_optimizer::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ([ $( [ $( $inner:tt )* ] ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!([ $( $inner )* ]) ),+ ];
        let first_shape = children[0].shape.clone();
        assert!(children.iter().all(|c| c.shape == first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};

    ([ $( $x:expr ),+ $(,)? ]) => {
        $crate::tensors::Tensor::<f64>::vector(vec![ $( $x ),+ ])
    };

    ($x:expr) => {
        $crate::tensors::Tensor::<f64>::scalar($x)
    };
}

/// Parses a JSON string containing a number or a (nested) array into a `Tensor<f64>`.
///
/// # Format
/// Accepts JSON numbers and arrays (e.g. `3`, `[1, 2]` or `[[1.0, 2.0], [3.0, 4.0]]`).
///
/// # Errors
/// Returns [`Error::Parse`] for malformed input, ragged arrays and trailing data.
pub fn parse_tensor(json: &str) -> Result<Tensor<f64>> {
    let mut parser = JsonArray {
        bytes: json.as_bytes(),
        pos: 0,
        dims: Vec::new(),
        leaf_depth: None,
        data: Vec::new(),
    };

    parser.skip_ws();
    if parser.peek() == Some(b'[') {
        parser.array(0)?;
    } else {
        let n = parser.number()?;
        parser.data.push(n);
        parser.leaf_depth = Some(0);
    }
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(Error::Parse("trailing characters"));
    }

    let ndim = parser.leaf_depth.unwrap_or(parser.dims.len());
    let shape: Vec<usize> = parser.dims[..ndim.min(parser.dims.len())]
        .iter()
        .map(|d| d.unwrap_or(0))
        .collect();
    Tensor::try_new(shape, parser.data).map_err(|_| Error::Parse("ragged tensor"))
}

struct JsonArray<'a> {
    bytes: &'a [u8],
    pos: usize,
    dims: Vec<Option<usize>>,
    leaf_depth: Option<usize>,
    data: Vec<f64>,
}

impl JsonArray<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8, msg: &'static str) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::Parse(msg))
        }
    }

    fn number(&mut self) -> Result<f64> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'+' | b'-'))
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.peek() {
                None => Error::Parse("unexpected EOF"),
                Some(_) => Error::Parse("invalid char"),
            });
        }
        core::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| Error::Parse("bad number"))?
            .parse::<f64>()
            .map_err(|_| Error::Parse("bad number"))
    }

    fn array(&mut self, depth: usize) -> Result<()> {
        self.expect(b'[', "expected '['")?;
        if self.dims.len() <= depth {
            self.dims.resize(depth + 1, None);
        }
        let mut count = 0usize;

        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return self.close(depth, 0);
        }

        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'[') => {
                    if self.leaf_depth.is_some_and(|d| d <= depth + 1) {
                        return Err(Error::Parse("ragged tensor"));
                    }
                    self.array(depth + 1)?;
                }
                Some(_) => {
                    match self.leaf_depth {
                        Some(d) if d != depth + 1 => return Err(Error::Parse("ragged tensor")),
                        _ => self.leaf_depth = Some(depth + 1),
                    }
                    let n = self.number()?;
                    self.data.push(n);
                }
                None => return Err(Error::Parse("unexpected EOF")),
            }
            count += 1;

            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    self.skip_ws();
                    if self.peek() == Some(b']') {
                        return Err(Error::Parse("trailing comma"));
                    }
                }
                Some(b']') => {
                    self.pos += 1;
                    return self.close(depth, count);
                }
                Some(_) => return Err(Error::Parse("two values without comma")),
                None => return Err(Error::Parse("unexpected EOF")),
            }
        }
    }

    fn close(&mut self, depth: usize, count: usize) -> Result<()> {
        match self.dims[depth] {
            None => {
                self.dims[depth] = Some(count);
                Ok(())
            }
            Some(seen) if seen == count => Ok(()),
            Some(_) => Err(Error::Parse("ragged tensor")),
        }
    }
}
