//! モデルの入出力
//!
//! - 重みの三つ組 `feature_hash,class,weight` によるテキスト形式
//! - rkyv による学習チェックポイント

use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use rkyv::api::serialize_using;
use rkyv::from_bytes;
use rkyv::rancor::Error;
use rkyv::ser::Serializer;
use rkyv::ser::allocator::Arena;
use rkyv::ser::sharing::Share;
use rkyv::ser::writer::IoWriter;
use rkyv::util::{AlignedVec, with_arena};

use crate::errors::{Result, SparselinError};
use crate::model::{Model, ModelData};
use crate::utils::{self, FromU32};

impl Model {
    /// 重み表を三つ組 `feature_hash,class,weight` の形式で書き出します。
    ///
    /// 平均化が有効な場合は、平均化された重みを書き出します。
    /// 重みが 0 のエントリは省略されます。
    ///
    /// # 引数
    ///
    /// * `wtr` - 書き込み先
    ///
    /// # エラー
    ///
    /// 書き込みに失敗した場合、[`SparselinError`] が返されます。
    pub fn write_weights<W>(&self, wtr: W) -> Result<()>
    where
        W: Write,
    {
        let table = &self.data.weights;
        let final_timestep = self.data.timestep;
        if table.is_averaging() && final_timestep == 0 && !table.is_empty() {
            log::warn!("exporting averaged weights before any update; raw weights are written");
        }

        let mut wtr = BufWriter::new(wtr);
        let mut n_written = 0usize;
        for (feature_hash, row) in table.iter() {
            for (class, &raw) in row.iter().enumerate() {
                let weight = if table.is_averaging() {
                    table.finalize_average(feature_hash, class, final_timestep)
                } else {
                    raw
                };
                if weight == 0.0 {
                    continue;
                }
                writeln!(&mut wtr, "{feature_hash},{class},{weight}")?;
                n_written += 1;
            }
        }
        wtr.flush()?;

        log::debug!("wrote {n_written} weight triples");
        Ok(())
    }

    /// 三つ組 `feature_hash,class,weight` の形式の重みを読み込みます。
    ///
    /// 三つ組の順序は問いません。同じ `(feature_hash, class)` が複数回現れた場合は
    /// 足し合わされます。空行は無視されます。
    ///
    /// # 引数
    ///
    /// * `rdr` - 読み込み元
    ///
    /// # エラー
    ///
    /// 以下の場合に [`SparselinError`] が返されます。
    ///
    /// - クラスがクラス数以上の場合: [`SparselinError::Configuration`]
    /// - 行の形式が不正な場合: [`SparselinError::InvalidFormat`]
    /// - 読み込みに失敗した場合
    ///
    /// エラーが返された場合、重み表は変更されません。
    ///
    /// # パニック
    ///
    /// 重み表の行数が `u32::MAX` を超える場合、パニックします。
    pub fn read_weights<R>(&mut self, rdr: R) -> Result<()>
    where
        R: Read,
    {
        let reader = BufReader::new(rdr);
        let n_classes = self.n_classes();
        let timestep = self.data.timestep;

        // Every record is validated before the table is touched.
        let mut triples: Vec<(u64, usize, f32)> = vec![];
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let invalid = |msg: &str| {
                SparselinError::invalid_format("weights", format!("line {}: {msg}", i + 1))
            };
            let fields = utils::parse_csv_row(line)?;
            let [feature_hash, class, weight] = fields.as_slice() else {
                return Err(invalid("a record must have 3 fields"));
            };
            let feature_hash: u64 = feature_hash
                .parse()
                .map_err(|_| invalid("invalid feature hash"))?;
            let class: usize = class.parse().map_err(|_| invalid("invalid class"))?;
            let weight: f32 = weight.parse().map_err(|_| invalid("invalid weight"))?;
            if !weight.is_finite() {
                return Err(invalid("weight must be finite"));
            }
            if class >= n_classes {
                return Err(SparselinError::configuration(
                    "weights",
                    format!("line {}: class {class} is not less than {n_classes}", i + 1),
                ));
            }
            triples.push((feature_hash, class, weight));
        }

        let n_read = triples.len();
        for (feature_hash, class, weight) in triples {
            self.data.weights.add(feature_hash, class, weight, timestep);
        }

        log::debug!("read {n_read} weight triples");
        Ok(())
    }

    /// 学習チェックポイントを書き出します。
    ///
    /// テンプレート構成、重み、平均化のための累積値、時刻をすべて含みます。
    ///
    /// # 引数
    ///
    /// * `wtr` - 書き込み先
    ///
    /// # エラー
    ///
    /// シリアライゼーションエラーが発生した場合、[`SparselinError::InvalidState`] が返されます。
    pub fn write_model<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        with_arena(|arena: &mut Arena| {
            let writer = IoWriter::new(&mut wtr);
            let mut serializer = Serializer::new(writer, arena.acquire(), Share::new());
            serialize_using::<_, Error>(&self.data, &mut serializer)
        })
        .map_err(|e| {
            SparselinError::invalid_state("rkyv serialization failed".to_string(), e.to_string())
        })?;

        Ok(())
    }

    /// 学習チェックポイントを読み込みます。
    ///
    /// # 引数
    ///
    /// * `rdr` - チェックポイントのリーダー
    ///
    /// # エラー
    ///
    /// デシリアライゼーションに失敗した場合、またはデータに矛盾がある場合、
    /// [`SparselinError::InvalidState`] が返されます。
    pub fn read_model<R>(mut rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let mut bytes = AlignedVec::<16>::new();
        bytes.extend_from_reader(&mut rdr)?;

        let mut data = from_bytes::<ModelData, Error>(&bytes).map_err(|e| {
            SparselinError::invalid_state(
                "rkyv deserialization failed. The model file may be corrupted.".to_string(),
                e.to_string(),
            )
        })?;
        data.weights.rebuild_index();
        if !data.weights.is_consistent()
            || !data.extractor.is_consistent()
            || data.weights.n_classes() != usize::from_u32(data.n_classes)
            || !(data.regularization.is_finite() && data.regularization > 0.0)
        {
            return Err(SparselinError::invalid_state(
                "inconsistent model data",
                "The model file may be corrupted.",
            ));
        }

        log::debug!(
            "read a model: n_classes={}, rows={}, timestep={}",
            data.n_classes,
            data.weights.len(),
            data.timestep,
        );
        Ok(Self::from_data(data))
    }
}
