//! 複数スレッドから同時に学習するための共有モデル
//!
//! 重み表の行を素性ハッシュで `n_shards` 個に分割し、それぞれを
//! [`parking_lot::Mutex`] で保護します。
//!
//! 更新では、コンテキストが触れるシャードをすべて番号の昇順にロックしてから時刻を
//! 取得し、重みを書き換えた後にロックを解放します。同じエントリに触れる更新は
//! 同じシャードのロックで直列化されるため、各エントリへの更新は時刻の昇順に
//! 適用され、遅延平均化の累積値が正しく保たれます。昇順にロックするため
//! デッドロックは起こりません。

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::errors::{Result, SparselinError};
use crate::feature::{Atom, Feature, FeatureExtractor};
use crate::model::{Model, ModelData};
use crate::scorer;
use crate::weights::WeightTable;

#[inline(always)]
fn shard_of(feature_hash: u64, n_shards: usize) -> usize {
    // n_shards fits in u64 on every supported target, and the remainder is below n_shards.
    (feature_hash % n_shards as u64) as usize
}

/// 並列学習のための共有モデル。
///
/// [`Model::into_shared`] で作成し、学習後に [`SharedModel::into_model`] で
/// [`Model`] に戻します。
///
/// # 例
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use sparselin::{FeatureTemplate, ModelBuilder};
///
/// let model = ModelBuilder::new(2, vec![FeatureTemplate::new([0])]).build()?;
/// let shared = model.into_shared(4)?;
///
/// std::thread::scope(|s| {
///     for atom in 1..=4 {
///         let shared = &shared;
///         s.spawn(move || shared.update(&[atom], 0, 1, 1.0).unwrap());
///     }
/// });
///
/// let model = shared.into_model();
/// assert_eq!(model.timestep(), 4);
/// assert_eq!(model.predict(&[3])?, 1);
/// # Ok(())
/// # }
/// ```
pub struct SharedModel {
    n_classes: u32,
    regularization: f32,
    averaging: bool,
    extractor: FeatureExtractor,
    shards: Vec<Mutex<WeightTable>>,
    timestep: AtomicU64,
}

impl SharedModel {
    pub(crate) fn new(data: ModelData, n_shards: usize) -> Result<Self> {
        if n_shards == 0 {
            return Err(SparselinError::invalid_argument(
                "n_shards",
                "must be positive",
            ));
        }
        let shards = data
            .weights
            .partition(n_shards, |key| shard_of(key, n_shards))
            .into_iter()
            .map(Mutex::new)
            .collect();
        Ok(Self {
            n_classes: data.n_classes,
            regularization: data.regularization,
            averaging: data.weights.is_averaging(),
            extractor: data.extractor,
            shards,
            timestep: AtomicU64::new(data.timestep),
        })
    }

    /// クラス数を返します。
    pub fn n_classes(&self) -> usize {
        self.n_classes as usize
    }

    /// 重み表の分割数を返します。
    pub fn n_shards(&self) -> usize {
        self.shards.len()
    }

    /// 現在の時刻を返します。
    pub fn timestep(&self) -> u64 {
        self.timestep.load(Ordering::SeqCst)
    }

    // Sorts features so that those in the same shard are adjacent.
    fn extract_grouped(&self, context: &[Atom]) -> Result<Vec<(usize, Feature)>> {
        let mut features = Vec::with_capacity(self.extractor.max_features());
        self.extractor.extract(context, &mut features)?;
        let n_shards = self.shards.len();
        let mut grouped: Vec<_> = features
            .into_iter()
            .map(|f| (shard_of(f.hash, n_shards), f))
            .collect();
        grouped.sort_by_key(|&(shard, _)| shard);
        Ok(grouped)
    }

    /// コンテキストのスコアを計算します。
    ///
    /// シャードは1つずつロックされます。他のスレッドが並行して更新している場合、
    /// 結果はいずれかの時点の重みを部分的に反映したものになります。
    ///
    /// # エラー
    ///
    /// コンテキスト長が一致しない場合、[`SparselinError::InputContract`] が返されます。
    pub fn score(&self, context: &[Atom], regularize: bool) -> Result<Vec<f32>> {
        let grouped = self.extract_grouped(context)?;
        let mut scores = vec![0.0; self.n_classes()];
        let mut features = Vec::with_capacity(grouped.len());
        for group in grouped.chunk_by(|a, b| a.0 == b.0) {
            features.clear();
            features.extend(group.iter().map(|&(_, f)| f));
            let shard = self.shards[group[0].0].lock();
            scorer::accumulate(&shard, &features, &mut scores);
        }
        if regularize {
            scorer::regularize(&mut scores, self.regularization);
        }
        Ok(scores)
    }

    /// 最もスコアの高いクラスを返します。
    ///
    /// # エラー
    ///
    /// コンテキスト長が一致しない場合、[`SparselinError::InputContract`] が返されます。
    pub fn predict(&self, context: &[Atom]) -> Result<usize> {
        scorer::arg_max(&self.score(context, false)?)
    }

    /// コスト考慮型パーセプトロンの規則で重みを更新します。
    ///
    /// 規則とエラーは [`Model::update`] と同じです。
    ///
    /// # パニック
    ///
    /// いずれかのシャードの行数が `u32::MAX` を超える場合、パニックします。
    pub fn update(&self, context: &[Atom], guess: usize, gold: usize, cost: f32) -> Result<()> {
        for (arg, class) in [("guess", guess), ("gold", gold)] {
            if class >= self.n_classes() {
                return Err(SparselinError::class_out_of_range(arg, class, self.n_classes()));
            }
        }
        if !(cost.is_finite() && cost >= 0.0) {
            return Err(SparselinError::invalid_argument(
                "cost",
                format!("must be a non-negative finite number, but got {cost}"),
            ));
        }
        let grouped = self.extract_grouped(context)?;

        if guess == gold {
            self.timestep.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let mut guards: Vec<(usize, MutexGuard<'_, WeightTable>)> = vec![];
        for &(shard, _) in &grouped {
            if guards.last().is_none_or(|&(last, _)| last != shard) {
                guards.push((shard, self.shards[shard].lock()));
            }
        }
        // The timestep must be taken while holding the locks.
        let t = self.timestep.fetch_add(1, Ordering::SeqCst);
        let mut g = 0;
        for &(shard, feature) in &grouped {
            while guards[g].0 != shard {
                g += 1;
            }
            let table = &mut guards[g].1;
            table.add(feature.hash, gold, cost, t);
            table.add(feature.hash, guess, -cost, t);
        }
        Ok(())
    }

    /// 共有モデルを [`Model`] に戻します。
    pub fn into_model(self) -> Model {
        let mut weights = WeightTable::new(self.n_classes(), self.averaging);
        for shard in self.shards {
            weights.absorb(shard.into_inner());
        }
        Model::from_data(ModelData {
            n_classes: self.n_classes,
            regularization: self.regularization,
            timestep: self.timestep.into_inner(),
            extractor: self.extractor,
            weights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::feature::FeatureTemplate;
    use crate::model::ModelBuilder;

    fn new_model(averaging: bool) -> Model {
        ModelBuilder::new(3, vec![FeatureTemplate::new([0]), FeatureTemplate::new([0, 1])])
            .averaging(averaging)
            .build()
            .unwrap()
    }

    fn exported(model: &Model) -> Vec<String> {
        let mut buf = vec![];
        model.write_weights(&mut buf).unwrap();
        let mut lines: Vec<_> = String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        lines.sort();
        lines
    }

    #[test]
    fn test_zero_shards() {
        assert!(matches!(
            new_model(false).into_shared(0),
            Err(SparselinError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_single_thread_matches_model() {
        let updates = [
            ([1, 2], 0, 1, 1.0),
            ([1, 3], 1, 2, 0.5),
            ([4, 2], 2, 2, 1.0),
            ([1, 2], 1, 0, 2.0),
        ];

        let mut model = new_model(true);
        let shared = new_model(true).into_shared(3).unwrap();
        for (context, guess, gold, cost) in updates {
            model.update(&context, guess, gold, cost).unwrap();
            shared.update(&context, guess, gold, cost).unwrap();
            assert_eq!(
                model.score(&context, true).unwrap(),
                shared.score(&context, true).unwrap()
            );
        }
        assert_eq!(4, shared.timestep());

        let merged = shared.into_model();
        assert_eq!(model.timestep(), merged.timestep());
        assert_eq!(exported(&model), exported(&merged));
    }

    #[test]
    fn test_preserves_existing_weights() {
        let mut model = new_model(true);
        model.update(&[1, 2], 0, 1, 1.0).unwrap();
        let before = exported(&model);

        let merged = model.into_shared(4).unwrap().into_model();
        assert_eq!(1, merged.timestep());
        assert_eq!(before, exported(&merged));
    }

    #[test]
    fn test_concurrent_updates() {
        let shared = new_model(false).into_shared(4).unwrap();
        let n_threads = 4;
        let n_steps = 100u64;

        std::thread::scope(|s| {
            for thread in 0..n_threads {
                let shared = &shared;
                s.spawn(move || {
                    for i in 0..n_steps {
                        // Every thread touches atom 1, so the threads contend on its rows.
                        let context = [1, i % 7 + thread];
                        shared.update(&context, 0, 1, 1.0).unwrap();
                    }
                });
            }
        });
        assert_eq!(n_threads * n_steps, shared.timestep());

        let mut sequential = new_model(false);
        for thread in 0..n_threads {
            for i in 0..n_steps {
                sequential.update(&[1, i % 7 + thread], 0, 1, 1.0).unwrap();
            }
        }
        // Integral weights make the result independent of the interleaving.
        let merged = shared.into_model();
        assert_eq!(exported(&sequential), exported(&merged));
        assert_eq!(
            sequential.score(&[1, 3], false).unwrap(),
            merged.score(&[1, 3], false).unwrap()
        );
    }

    #[test]
    fn test_concurrent_averaged_updates() {
        let model = ModelBuilder::new(
            4,
            vec![FeatureTemplate::new([0]), FeatureTemplate::new([0, 1])],
        )
        .bias(true)
        .averaging(true)
        .build()
        .unwrap();
        let shared = model.into_shared(8).unwrap();
        let n_threads = 8u64;
        let n_steps = 2_000u64;

        std::thread::scope(|s| {
            for thread in 0..n_threads {
                let shared = &shared;
                s.spawn(move || {
                    for i in 0..n_steps {
                        let context = [i % 13 + 1, (i + thread) % 5 + 1];
                        let guess = shared.predict(&context).unwrap();
                        let gold = usize::try_from((i + thread) % 4).unwrap();
                        shared.update(&context, guess, gold, 1.0).unwrap();
                    }
                });
            }
        });
        assert_eq!(n_threads * n_steps, shared.timestep());

        // Every update moves weight from one class to another, so each row sums to zero
        // up to the rounding of the averaged values.
        let averaged = shared.into_model().averaged();
        assert_eq!(n_threads * n_steps, averaged.timestep());
        let sums_to_zero = |values: &[f32]| {
            let scale: f32 = values.iter().map(|v| v.abs()).sum();
            values.iter().all(|v| v.is_finite())
                && values.iter().sum::<f32>().abs() <= 1e-5 * scale.max(1.0)
        };
        assert!(!averaged.weights().is_empty());
        for (_, row) in averaged.weights().iter() {
            assert!(sums_to_zero(row), "{row:?}");
        }
        // A context has two template features and the bias.
        let max_row: f32 = averaged
            .weights()
            .iter()
            .map(|(_, row)| row.iter().map(|v| v.abs()).sum::<f32>())
            .fold(1.0, f32::max);
        for a in 1..=13 {
            for b in 1..=5 {
                let scores = averaged.score(&[a, b], false).unwrap();
                assert!(scores.iter().sum::<f32>().abs() <= 3e-5 * max_row, "{scores:?}");
            }
        }
    }

    #[test]
    fn test_invalid_update_keeps_timestep() {
        let shared = new_model(false).into_shared(2).unwrap();
        assert!(matches!(
            shared.update(&[1, 2], 3, 0, 1.0),
            Err(SparselinError::ClassOutOfRange(_))
        ));
        assert!(matches!(
            shared.update(&[1, 2], 0, 1, -1.0),
            Err(SparselinError::InvalidArgument(_))
        ));
        assert!(matches!(
            shared.update(&[1], 0, 1, 1.0),
            Err(SparselinError::InputContract(_))
        ));
        assert_eq!(0, shared.timestep());
    }
}
