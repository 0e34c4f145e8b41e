use std::io::Cursor;

use arrow::array::{Array, Int16Array, LargeStringArray};
use arrow::datatypes::DataType;
use arrow::ipc::reader::StreamReader;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use uuid::Uuid;

use crate::GatewayError;

/// One cell of a projected result-message row, in COPY order.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int16(i16),
    Int32(i32),
    Text(String),
}

/// Decode the base64 Arrow IPC stream a `succeeded` event carries and
/// project every record-batch row into `[job_id, attempt_id, col0, col1, …]`.
///
/// Supported column types are `Int16` and `LargeUtf8`; anything else lands
/// as NULL so one odd column cannot sink the whole attempt.
pub fn decode_result_rows(
    job_id: Uuid,
    attempt_id: i32,
    arrow_batches: &str,
) -> Result<Vec<Vec<CellValue>>, GatewayError> {
    let bytes = BASE64.decode(arrow_batches)?;
    let reader = StreamReader::try_new(Cursor::new(bytes), None)?;

    let mut rows = Vec::new();

    for batch in reader {
        let batch = batch?;

        for row_idx in 0..batch.num_rows() {
            let mut row = Vec::with_capacity(batch.num_columns() + 2);
            row.push(CellValue::Text(job_id.to_string()));
            row.push(CellValue::Int32(attempt_id));

            for column in batch.columns() {
                row.push(project_cell(column.as_ref(), row_idx));
            }

            rows.push(row);
        }
    }

    Ok(rows)
}

fn project_cell(column: &dyn Array, row_idx: usize) -> CellValue {
    if column.is_null(row_idx) {
        return CellValue::Null;
    }

    match column.data_type() {
        DataType::Int16 => match column.as_any().downcast_ref::<Int16Array>() {
            Some(values) => CellValue::Int16(values.value(row_idx)),
            None => CellValue::Null,
        },
        DataType::LargeUtf8 => match column.as_any().downcast_ref::<LargeStringArray>() {
            Some(values) => CellValue::Text(values.value(row_idx).to_string()),
            None => CellValue::Null,
        },
        other => {
            tracing::warn!(column_type = %other, "unhandled arrow column type, storing null");
            CellValue::Null
        }
    }
}
