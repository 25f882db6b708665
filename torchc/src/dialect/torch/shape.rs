//! Shape helpers shared by type inference and both lowerings.

use crate::dialect::torch::TensorInfo;
use anyhow::Result;

/// Broadcast two partially known shapes following NumPy semantics.
///
/// Shapes are aligned at the trailing dimension. A dimension of size 1
/// stretches to the other size. An unknown dimension against a known size
/// `n > 1` becomes `n` since any other size would be an error at runtime.
pub fn broadcast_sizes(lhs: &[Option<i64>], rhs: &[Option<i64>]) -> Result<Vec<Option<i64>>> {
    let rank = lhs.len().max(rhs.len());
    let mut result = vec![None; rank];
    for i in 0..rank {
        let l = if i < rank - lhs.len() {
            Some(1)
        } else {
            lhs[i - (rank - lhs.len())]
        };
        let r = if i < rank - rhs.len() {
            Some(1)
        } else {
            rhs[i - (rank - rhs.len())]
        };
        result[i] = match (l, r) {
            (Some(1), other) | (other, Some(1)) => other,
            (Some(a), Some(b)) if a == b => Some(a),
            (Some(_), Some(_)) => {
                return Err(anyhow::anyhow!(
                    "shapes {} and {} are not broadcast compatible",
                    format_sizes(lhs),
                    format_sizes(rhs)
                ));
            }
            (None, Some(n)) | (Some(n), None) => Some(n),
            (None, None) => None,
        };
    }
    Ok(result)
}

/// Broadcast two static shapes.
pub fn broadcast_static(lhs: &[i64], rhs: &[i64]) -> Result<Vec<i64>> {
    let lhs = lhs.iter().map(|d| Some(*d)).collect::<Vec<_>>();
    let rhs = rhs.iter().map(|d| Some(*d)).collect::<Vec<_>>();
    let sizes = broadcast_sizes(&lhs, &rhs)?;
    Ok(sizes.into_iter().map(|d| d.unwrap_or(-1)).collect())
}

/// Broadcast the shapes and promote the dtypes of two tensors.
///
/// Unknown rank or dtype on either side gives an unknown result.
pub fn broadcast_info(lhs: &TensorInfo, rhs: &TensorInfo) -> Result<TensorInfo> {
    let sizes = match (&lhs.sizes, &rhs.sizes) {
        (Some(a), Some(b)) => Some(broadcast_sizes(a, b)?),
        _ => None,
    };
    let dtype = match (lhs.dtype, rhs.dtype) {
        (Some(a), Some(b)) => match a.promote(&b) {
            Some(dtype) => Some(dtype),
            None => return Err(anyhow::anyhow!("cannot promote {a} and {b}")),
        },
        _ => None,
    };
    Ok(TensorInfo::new(sizes, dtype))
}

/// Turn a possibly negative dimension index into a position.
pub fn normalize_dim(dim: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let dim = if dim < 0 { dim + rank } else { dim };
    if 0 <= dim && dim < rank {
        Some(dim as usize)
    } else {
        None
    }
}

/// Row-major strides of a static shape.
pub fn strides(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Sizes for `view` and `reshape`, with a single `-1` inferred from the
/// number of elements when that is known.
pub fn reshape_sizes(input: &TensorInfo, sizes: &[i64]) -> Result<Vec<Option<i64>>> {
    let inferred = sizes.iter().filter(|d| **d == -1).count();
    if inferred > 1 {
        return Err(anyhow::anyhow!("only one dimension can be inferred"));
    }
    if let Some(d) = sizes.iter().find(|d| **d < -1) {
        return Err(anyhow::anyhow!("invalid size {d}"));
    }
    let known = sizes.iter().filter(|d| **d != -1).product::<i64>();
    let total = input.static_shape().map(|shape| shape.iter().product::<i64>());
    let mut result = vec![];
    for d in sizes {
        if *d == -1 {
            match total {
                Some(total) if known != 0 && total % known == 0 => result.push(Some(total / known)),
                Some(total) => {
                    return Err(anyhow::anyhow!("cannot view {total} elements as {sizes:?}"));
                }
                None => result.push(None),
            }
        } else {
            result.push(Some(*d));
        }
    }
    if let (Some(total), 0) = (total, inferred) {
        if total != known {
            return Err(anyhow::anyhow!("cannot view {total} elements as {sizes:?}"));
        }
    }
    Ok(result)
}

/// Clamped `(start, length)` of a strided slice over a dimension of `size`.
///
/// Negative `start` and `end` count from the end; missing bounds cover the
/// whole dimension.
pub fn slice_bounds(size: i64, start: Option<i64>, end: Option<i64>, step: i64) -> (i64, i64) {
    let clamp = |index: i64| {
        let index = if index < 0 { index + size } else { index };
        index.clamp(0, size)
    };
    let start = clamp(start.unwrap_or(0));
    let end = clamp(end.unwrap_or(size));
    let length = if end > start {
        (end - start + step - 1) / step
    } else {
        0
    };
    (start, length)
}

pub fn format_sizes(sizes: &[Option<i64>]) -> String {
    let dims = sizes
        .iter()
        .map(|d| match d {
            Some(d) => d.to_string(),
            None => "?".to_string(),
        })
        .collect::<Vec<String>>()
        .join(",");
    format!("[{dims}]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::torch::Dtype;

    #[test]
    fn test_broadcast() {
        let shape = broadcast_static(&[3, 1], &[1, 4]).unwrap();
        assert_eq!(shape, vec![3, 4]);
        let shape = broadcast_static(&[4], &[2, 3, 4]).unwrap();
        assert_eq!(shape, vec![2, 3, 4]);
        assert!(broadcast_static(&[3], &[4]).is_err());
        let sizes = broadcast_sizes(&[None, Some(1)], &[Some(5)]).unwrap();
        assert_eq!(sizes, vec![None, Some(5)]);
    }

    #[test]
    fn test_broadcast_info() {
        let lhs = TensorInfo::of(&[3, 1], Dtype::Si64);
        let rhs = TensorInfo::of(&[4], Dtype::F32);
        let info = broadcast_info(&lhs, &rhs).unwrap();
        assert_eq!(info, TensorInfo::of(&[3, 4], Dtype::F32));
        let unranked = TensorInfo::new(None, Some(Dtype::F32));
        assert_eq!(broadcast_info(&lhs, &unranked).unwrap().sizes, None);
    }

    #[test]
    fn test_reshape_sizes() {
        let input = TensorInfo::of(&[2, 6], Dtype::F32);
        let sizes = reshape_sizes(&input, &[3, -1]).unwrap();
        assert_eq!(sizes, vec![Some(3), Some(4)]);
        assert!(reshape_sizes(&input, &[5, -1]).is_err());
        assert!(reshape_sizes(&input, &[-1, -1]).is_err());
        assert!(reshape_sizes(&input, &[3, 3]).is_err());
    }

    #[test]
    fn test_slice_bounds() {
        assert_eq!(slice_bounds(10, Some(1), Some(8), 3), (1, 3));
        assert_eq!(slice_bounds(10, Some(-3), None, 1), (7, 3));
        assert_eq!(slice_bounds(4, None, Some(i64::MAX), 2), (0, 2));
        assert_eq!(slice_bounds(4, Some(3), Some(1), 1), (3, 0));
    }

    #[test]
    fn test_strides() {
        assert_eq!(strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(strides(&[]), Vec::<i64>::new());
    }
}
