//! Row-wise long256 arithmetic over Arrow columns

use crate::error::{QueryError, Result};
use crate::types::{wide_int_array, wide_int_value, WideInt256, WIDE_INT_BYTES};
use arrow::array::{Array, ArrayRef, FixedSizeBinaryArray};
use std::sync::Arc;

fn as_wide<'a>(array: &'a ArrayRef, side: &str) -> Result<&'a FixedSizeBinaryArray> {
    let wide = array
        .as_any()
        .downcast_ref::<FixedSizeBinaryArray>()
        .ok_or_else(|| {
            QueryError::Type(format!(
                "{} operand must be long256, got {:?}",
                side,
                array.data_type()
            ))
        })?;
    if wide.value_length() as usize != WIDE_INT_BYTES {
        return Err(QueryError::Type(format!(
            "{} operand has {}-byte values, expected {}",
            side,
            wide.value_length(),
            WIDE_INT_BYTES
        )));
    }
    Ok(wide)
}

fn binary<F>(left: &ArrayRef, right: &ArrayRef, op: F) -> Result<ArrayRef>
where
    F: Fn(&WideInt256, &WideInt256) -> WideInt256,
{
    let l = as_wide(left, "left")?;
    let r = as_wide(right, "right")?;
    if l.len() != r.len() {
        return Err(QueryError::InvalidArgument(format!(
            "operand lengths differ: {} vs {}",
            l.len(),
            r.len()
        )));
    }
    let result = wide_int_array(
        (0..l.len()).map(|i| op(&wide_int_value(l, i), &wide_int_value(r, i))),
    )?;
    Ok(Arc::new(result))
}

/// `left + right` per row; NULL on either side gives NULL
pub fn long256_add(left: &ArrayRef, right: &ArrayRef) -> Result<ArrayRef> {
    binary(left, right, WideInt256::add)
}

/// `left - right` per row; NULL on either side gives NULL
pub fn long256_sub(left: &ArrayRef, right: &ArrayRef) -> Result<ArrayRef> {
    binary(left, right, WideInt256::subtract)
}
