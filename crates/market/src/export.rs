use crate::snapshot::{KlineRow, materialize};
use kline_core::common::time::EXPORT_TIME_FORMAT;
use kline_core::market::entity::Kline;
use kline_core::market::error::SeriesError;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// 导出文件的固定列顺序，与 K 线字段一一对应
pub const CSV_HEADER: [&str; 12] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "close_time",
    "quote_av",
    "trades",
    "tb_base_av",
    "tb_quote_av",
    "ignore",
];

/// # Summary
/// 将物化行写为带表头的 CSV。
///
/// # Logic
/// 1. 写入固定表头。
/// 2. 逐行写出，时间列渲染为 `YYYY-MM-DD HH:MM:SS.mmm` (UTC)，数值列保持十进制原文。
///
/// # Arguments
/// * `rows`: 已规范化的物化行。
/// * `writer`: 任意输出目标。
///
/// # Returns
/// 写入失败返回 `SeriesError::Export`。
pub fn write_csv<W: Write>(rows: &[KlineRow], writer: W) -> Result<(), SeriesError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADER).map_err(export_err)?;
    for row in rows {
        wtr.write_record([
            row.open_time.format(EXPORT_TIME_FORMAT).to_string(),
            row.open.to_string(),
            row.high.to_string(),
            row.low.to_string(),
            row.close.to_string(),
            row.volume.to_string(),
            row.close_time.format(EXPORT_TIME_FORMAT).to_string(),
            row.quote_asset_volume.to_string(),
            row.num_trades.to_string(),
            row.taker_buy_base_volume.to_string(),
            row.taker_buy_quote_volume.to_string(),
            row.ignore.clone(),
        ])
        .map_err(export_err)?;
    }
    wtr.flush().map_err(|e| SeriesError::Export(e.to_string()))?;
    Ok(())
}

/// # Summary
/// 物化快照并写入指定路径。
///
/// # Logic
/// 1. 规范化并转换时间字段。
/// 2. 先写入同目录下的临时文件，成功后再重命名覆盖目标文件。
/// 3. 任一步失败都删除临时文件，目标文件保持原状。
///
/// # Returns
/// 成功返回写入的数据行数。
pub fn export_snapshot(snapshot: Vec<Kline>, path: &Path) -> Result<usize, SeriesError> {
    let rows = materialize(snapshot)?;

    let tmp = path.with_extension("csv.tmp");
    let written = std::fs::File::create(&tmp)
        .map_err(|e| SeriesError::Export(format!("cannot create {}: {}", tmp.display(), e)))
        .and_then(|file| write_csv(&rows, std::io::BufWriter::new(file)))
        .and_then(|()| {
            std::fs::rename(&tmp, path).map_err(|e| {
                SeriesError::Export(format!("cannot move export into {}: {}", path.display(), e))
            })
        });
    if let Err(e) = written {
        if tmp.exists() {
            if let Err(rm) = std::fs::remove_file(&tmp) {
                warn!("Failed to remove temporary export {}: {}", tmp.display(), rm);
            }
        }
        return Err(e);
    }

    info!("Exported {} klines to {}", rows.len(), path.display());
    Ok(rows.len())
}

fn export_err(e: csv::Error) -> SeriesError {
    SeriesError::Export(e.to_string())
}
