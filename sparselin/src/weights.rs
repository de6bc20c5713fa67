//! 素性ハッシュ × クラスの疎な重み表
//!
//! 素性ハッシュを行番号に写すハッシュ表と、`n_classes` 個の重みを連続して並べた
//! アリーナからなります。スコア計算では1つの素性につき1行を線形に走査します。
//!
//! 平均化が有効な場合は、各エントリについて累積和 `total` と最終更新時刻
//! `last_update` を同じレイアウトで保持し、エントリに触れたときにだけ経過分を
//! 遅延して加算します。

use hashbrown::HashMap;
use rkyv::with::Skip;
use rkyv::{Archive, Deserialize, Serialize};

use crate::utils::FromU32;

/// 疎な重み表。
///
/// エントリは最初の書き込み時に作成され、削除されることはありません。
/// 存在しないエントリの重みは 0 です。
#[derive(Clone, Debug, Archive, Serialize, Deserialize)]
pub struct WeightTable {
    n_classes: u32,
    averaging: bool,

    // Feature hash of each row.
    keys: Vec<u64>,
    weights: Vec<f32>,
    totals: Vec<f64>,
    last_updates: Vec<u64>,

    #[rkyv(with = Skip)]
    index: HashMap<u64, u32>,
}

impl WeightTable {
    /// 空の重み表を作成します。
    ///
    /// # 引数
    ///
    /// * `n_classes` - クラス数（1以上）
    /// * `averaging` - 平均化のための累積値を保持するかどうか
    ///
    /// # パニック
    ///
    /// `n_classes` が 0 または `u32` に収まらない場合、パニックします。
    pub fn new(n_classes: usize, averaging: bool) -> Self {
        assert!(n_classes > 0, "n_classes must be positive");
        Self {
            n_classes: u32::try_from(n_classes).expect("n_classes must fit in u32"),
            averaging,
            keys: vec![],
            weights: vec![],
            totals: vec![],
            last_updates: vec![],
            index: HashMap::new(),
        }
    }

    /// クラス数を返します。
    #[inline(always)]
    pub fn n_classes(&self) -> usize {
        usize::from_u32(self.n_classes)
    }

    /// 平均化のための累積値を保持しているかどうかを返します。
    #[inline(always)]
    pub const fn is_averaging(&self) -> bool {
        self.averaging
    }

    /// 行（素性）の数を返します。
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// 行が1つもない場合に `true` を返します。
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[inline(always)]
    fn row_range(&self, row: u32) -> std::ops::Range<usize> {
        let start = usize::from_u32(row) * self.n_classes();
        start..start + self.n_classes()
    }

    /// 素性ハッシュに対応する重みの行を返します。
    #[inline(always)]
    pub fn row(&self, feature_hash: u64) -> Option<&[f32]> {
        self.index
            .get(&feature_hash)
            .map(|&row| &self.weights[self.row_range(row)])
    }

    /// 重みを返します。エントリが存在しない場合は 0 です。
    ///
    /// # パニック
    ///
    /// `class` が範囲外の場合、パニックします。
    #[inline(always)]
    pub fn get(&self, feature_hash: u64, class: usize) -> f32 {
        assert!(class < self.n_classes());
        self.row(feature_hash).map_or(0.0, |row| row[class])
    }

    fn row_or_insert(&mut self, feature_hash: u64) -> u32 {
        if let Some(&row) = self.index.get(&feature_hash) {
            return row;
        }
        let row = u32::try_from(self.keys.len()).expect("too many rows in the weight table");
        let n_classes = self.n_classes();
        self.keys.push(feature_hash);
        self.weights.resize(self.weights.len() + n_classes, 0.0);
        if self.averaging {
            self.totals.resize(self.totals.len() + n_classes, 0.0);
            self.last_updates.resize(self.last_updates.len() + n_classes, 0);
        }
        self.index.insert(feature_hash, row);
        row
    }

    /// 重みに `delta` を加算します。
    ///
    /// エントリが存在しない場合は 0 で作成してから加算します。平均化が有効な場合は、
    /// 加算の前に `total += weight * (timestep - last_update)` を行い、
    /// `last_update` を `timestep` に進めます。
    ///
    /// 同じエントリへの `timestep` は単調非減少でなければなりません。
    ///
    /// # パニック
    ///
    /// `class` が範囲外の場合、または新しい行の作成で行数が `u32::MAX` を超える場合、
    /// パニックします。
    pub fn add(&mut self, feature_hash: u64, class: usize, delta: f32, timestep: u64) {
        assert!(class < self.n_classes());
        let row = self.row_or_insert(feature_hash);
        let i = self.row_range(row).start + class;
        if self.averaging {
            debug_assert!(timestep >= self.last_updates[i]);
            let elapsed = timestep.saturating_sub(self.last_updates[i]);
            self.totals[i] += f64::from(self.weights[i]) * elapsed as f64;
            self.last_updates[i] = timestep;
        }
        self.weights[i] += delta;
    }

    /// 平均化された重みを返します。
    ///
    /// `final_timestep` までの経過分を加えた累積和を `final_timestep` で割った値です。
    /// 生の重みや累積値は変更しません。平均化が無効な場合、または `final_timestep` が
    /// 0 の場合は生の重みを返します。
    ///
    /// # パニック
    ///
    /// `class` が範囲外の場合、パニックします。
    pub fn finalize_average(&self, feature_hash: u64, class: usize, final_timestep: u64) -> f32 {
        assert!(class < self.n_classes());
        let Some(&row) = self.index.get(&feature_hash) else {
            return 0.0;
        };
        let i = self.row_range(row).start + class;
        if !self.averaging || final_timestep == 0 {
            return self.weights[i];
        }
        let elapsed = final_timestep.saturating_sub(self.last_updates[i]);
        let total = self.totals[i] + f64::from(self.weights[i]) * elapsed as f64;
        (total / final_timestep as f64) as f32
    }

    /// すべての行を `(素性ハッシュ, 重みの行)` として列挙します。
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[f32])> {
        self.keys
            .iter()
            .copied()
            .zip(self.weights.chunks_exact(self.n_classes()))
    }

    /// 平均化された重みだけを持つ、平均化無効の重み表を作成します。
    pub fn averaged(&self, final_timestep: u64) -> Self {
        let mut result = Self::new(self.n_classes(), false);
        for &key in &self.keys {
            let row = result.row_or_insert(key);
            let range = result.row_range(row);
            for (class, i) in range.enumerate() {
                result.weights[i] = self.finalize_average(key, class, final_timestep);
            }
        }
        result
    }

    /// 別の重み表の行を取り込みます。
    ///
    /// 同じ素性ハッシュの行は要素ごとに足し合わされ、累積値も合算されます。
    /// 最終更新時刻は大きい方が採用されます。
    ///
    /// # パニック
    ///
    /// クラス数または平均化の有無が異なる場合、パニックします。
    pub fn absorb(&mut self, other: Self) {
        assert_eq!(self.n_classes, other.n_classes);
        assert_eq!(self.averaging, other.averaging);
        for (r, &key) in (0u32..).zip(&other.keys) {
            let src = other.row_range(r);
            let row = self.row_or_insert(key);
            let dst = self.row_range(row);
            for (s, d) in src.zip(dst) {
                self.weights[d] += other.weights[s];
                if self.averaging {
                    self.totals[d] += other.totals[s];
                    self.last_updates[d] = self.last_updates[d].max(other.last_updates[s]);
                }
            }
        }
    }

    /// 行を `n_parts` 個の重み表に振り分けます。
    ///
    /// 各行は `part_of(素性ハッシュ)` 番目の重み表に、累積値ごと複製されます。
    pub(crate) fn partition<F>(&self, n_parts: usize, part_of: F) -> Vec<Self>
    where
        F: Fn(u64) -> usize,
    {
        let mut parts: Vec<_> = (0..n_parts)
            .map(|_| Self::new(self.n_classes(), self.averaging))
            .collect();
        for (r, &key) in (0u32..).zip(&self.keys) {
            let part = &mut parts[part_of(key)];
            let src = self.row_range(r);
            let row = part.row_or_insert(key);
            let dst = part.row_range(row);
            part.weights[dst.clone()].copy_from_slice(&self.weights[src.clone()]);
            if self.averaging {
                part.totals[dst.clone()].copy_from_slice(&self.totals[src.clone()]);
                part.last_updates[dst].copy_from_slice(&self.last_updates[src]);
            }
        }
        parts
    }

    /// 各配列の長さとインデックスが行数と整合しているかを確認します。
    pub(crate) fn is_consistent(&self) -> bool {
        let n = self.keys.len() * self.n_classes();
        let accumulators = if self.averaging { n } else { 0 };
        self.n_classes != 0
            && self.weights.len() == n
            && self.totals.len() == accumulators
            && self.last_updates.len() == accumulators
            && self.index.len() == self.keys.len()
    }

    /// 素性ハッシュから行番号へのインデックスを再構築します。
    ///
    /// インデックスはシリアライズされないため、デシリアライズ後に呼び出す必要があります。
    pub(crate) fn rebuild_index(&mut self) {
        self.index = (0u32..).zip(&self.keys).map(|(row, &key)| (key, row)).collect();
    }
}
