//! Page frames - the unit a scan is split into
//!
//! A page frame is a contiguous run of rows from one table partition. Column
//! data stays in place: frames are zero-copy slices of Arrow record batches, and
//! wide integer columns are read through a fixed 32-byte stride view.

use crate::error::{QueryError, Result};
use crate::types::{WideInt256, WIDE_INT_BYTES};
use arrow::array::{Array, ArrayRef, FixedSizeBinaryArray, Int32Array, Int64Array, RecordBatch};
use arrow::buffer::NullBuffer;
use arrow::datatypes::{DataType, SchemaRef};

/// Row order the consumer requires from a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Ascending,
    Descending,
}

impl ScanOrder {
    /// Frame index delivered at `position` out of `frame_count`
    #[inline]
    pub fn frame_at(self, position: usize, frame_count: usize) -> usize {
        match self {
            ScanOrder::Ascending => position,
            ScanOrder::Descending => frame_count - 1 - position,
        }
    }
}

/// One contiguous run of rows
#[derive(Debug, Clone)]
pub struct PageFrame {
    /// Dense index of this frame within the scan, in source order
    index: usize,
    /// Table row id of the frame's first row
    first_row: u64,
    batch: RecordBatch,
}

impl PageFrame {
    pub fn new(index: usize, first_row: u64, batch: RecordBatch) -> Self {
        Self {
            index,
            first_row,
            batch,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn first_row(&self) -> u64 {
        self.first_row
    }

    pub fn row_count(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn column(&self, index: usize) -> Result<&ArrayRef> {
        if index >= self.batch.num_columns() {
            return Err(QueryError::ColumnNotFound(format!(
                "column #{} (frame has {})",
                index,
                self.batch.num_columns()
            )));
        }
        Ok(self.batch.column(index))
    }

    /// Fixed-stride view over a wide integer column
    pub fn wide_column(&self, index: usize) -> Result<WideColumn<'_>> {
        let column = self.column(index)?;
        let array = column
            .as_any()
            .downcast_ref::<FixedSizeBinaryArray>()
            .ok_or_else(|| {
                QueryError::Type(format!(
                    "column #{} is {:?}, expected {:?}",
                    index,
                    column.data_type(),
                    WideInt256::data_type()
                ))
            })?;
        WideColumn::from_array(array)
    }

    /// True when every row of the column is null, as for a column that did not
    /// exist yet when this frame was written
    pub fn is_column_absent(&self, index: usize) -> Result<bool> {
        let column = self.column(index)?;
        Ok(column.null_count() == column.len())
    }

    pub fn record(&self, row: usize) -> FrameRecord<'_> {
        FrameRecord { frame: self, row }
    }
}

/// Column values at a 32-byte stride: four little-endian limbs per row
#[derive(Debug, Clone)]
pub struct WideColumn<'a> {
    data: &'a [u8],
    nulls: Option<NullBuffer>,
    row_count: usize,
}

impl<'a> WideColumn<'a> {
    /// View `row_count` values starting at the beginning of `data`
    pub fn from_bytes(data: &'a [u8], row_count: usize) -> Result<Self> {
        if data.len() < row_count * WIDE_INT_BYTES {
            return Err(QueryError::InvalidArgument(format!(
                "{} bytes cannot hold {} wide values",
                data.len(),
                row_count
            )));
        }
        Ok(Self {
            data,
            nulls: None,
            row_count,
        })
    }

    pub fn from_array(array: &'a FixedSizeBinaryArray) -> Result<Self> {
        if array.value_length() as usize != WIDE_INT_BYTES {
            return Err(QueryError::Type(format!(
                "wide column stride is {} bytes, expected {}",
                array.value_length(),
                WIDE_INT_BYTES
            )));
        }
        let mut view = Self::from_bytes(array.value_data(), array.len())?;
        view.nulls = array.nulls().cloned();
        Ok(view)
    }

    pub fn len(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    #[inline]
    pub fn get(&self, row: usize) -> WideInt256 {
        if let Some(nulls) = &self.nulls {
            if nulls.is_null(row) {
                return WideInt256::NULL;
            }
        }
        let offset = row * WIDE_INT_BYTES;
        WideInt256::from_le_bytes(&self.data[offset..offset + WIDE_INT_BYTES])
    }

    pub fn iter(&self) -> impl Iterator<Item = WideInt256> + '_ {
        (0..self.row_count).map(move |row| self.get(row))
    }
}

/// Cursor-style accessor for one row of a frame
#[derive(Debug, Clone, Copy)]
pub struct FrameRecord<'a> {
    frame: &'a PageFrame,
    row: usize,
}

impl<'a> FrameRecord<'a> {
    /// Row index within the frame
    pub fn row(&self) -> usize {
        self.row
    }

    /// Row id within the table
    pub fn row_id(&self) -> u64 {
        self.frame.first_row + self.row as u64
    }

    pub fn frame(&self) -> &'a PageFrame {
        self.frame
    }

    pub fn get_wide(&self, column: usize) -> Result<WideInt256> {
        let array = self.frame.column(column)?;
        let array = array
            .as_any()
            .downcast_ref::<FixedSizeBinaryArray>()
            .ok_or_else(|| QueryError::Type(format!("column #{} is not long256", column)))?;
        Ok(crate::types::wide_int_value(array, self.row))
    }

    pub fn get_i64(&self, column: usize) -> Result<Option<i64>> {
        let array = self.frame.column(column)?;
        match array.data_type() {
            DataType::Int64 => {
                let values = array.as_any().downcast_ref::<Int64Array>().ok_or_else(|| {
                    QueryError::Internal("Int64 column failed to downcast".to_string())
                })?;
                Ok((!values.is_null(self.row)).then(|| values.value(self.row)))
            }
            DataType::Int32 => Ok(self.get_i32(column)?.map(i64::from)),
            other => Err(QueryError::Type(format!(
                "column #{} is {:?}, expected an integer",
                column, other
            ))),
        }
    }

    pub fn get_i32(&self, column: usize) -> Result<Option<i32>> {
        let array = self.frame.column(column)?;
        let values = array
            .as_any()
            .downcast_ref::<Int32Array>()
            .ok_or_else(|| QueryError::Type(format!("column #{} is not Int32", column)))?;
        Ok((!values.is_null(self.row)).then(|| values.value(self.row)))
    }
}

/// Column/page-frame provider
///
/// Decides frame boundaries. Frames are returned in source order with dense
/// indices starting at zero.
pub trait PageFrameSource: Send + Sync {
    fn schema(&self) -> SchemaRef;

    fn frames(&self) -> Result<Vec<PageFrame>>;

    /// Whether consumers expect rows newest first
    fn has_descending_order(&self) -> bool {
        false
    }

    fn scan_order(&self) -> ScanOrder {
        if self.has_descending_order() {
            ScanOrder::Descending
        } else {
            ScanOrder::Ascending
        }
    }
}

/// In-memory table split into frames of at most `frame_rows` rows
#[derive(Debug, Clone)]
pub struct MemoryPageFrameSource {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    frame_rows: usize,
    descending: bool,
}

impl MemoryPageFrameSource {
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>, frame_rows: usize) -> Result<Self> {
        if frame_rows == 0 {
            return Err(QueryError::InvalidArgument(
                "frame_rows must be greater than zero".to_string(),
            ));
        }
        for batch in &batches {
            if batch.schema() != schema {
                return Err(QueryError::InvalidArgument(
                    "batch schema does not match table schema".to_string(),
                ));
            }
        }
        Ok(Self {
            schema,
            batches,
            frame_rows,
            descending: false,
        })
    }

    /// Ask consumers for descending row order
    pub fn with_descending_order(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn total_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

impl PageFrameSource for MemoryPageFrameSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn frames(&self) -> Result<Vec<PageFrame>> {
        let mut frames = Vec::new();
        let mut first_row = 0u64;
        for batch in &self.batches {
            let mut offset = 0;
            while offset < batch.num_rows() {
                let len = self.frame_rows.min(batch.num_rows() - offset);
                frames.push(PageFrame::new(
                    frames.len(),
                    first_row,
                    batch.slice(offset, len),
                ));
                first_row += len as u64;
                offset += len;
            }
        }
        Ok(frames)
    }

    fn has_descending_order(&self) -> bool {
        self.descending
    }
}
