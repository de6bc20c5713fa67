//! 素性抽出・スコア計算・更新をまとめたモデル
//!
//! 外部の学習ループやデコーダに対して、読み込み側の [`Model::score`] と
//! 書き込み側の [`Model::update`] の2つの入口を提供します。

mod io;

use std::io::Read;

use rkyv::{Archive, Deserialize, Serialize};

use crate::errors::{Result, SparselinError};
use crate::feature::{AbsentPolicy, Atom, Feature, FeatureExtractor, FeatureTemplate, TemplateSet};
use crate::scorer;
use crate::shared::SharedModel;
use crate::weights::WeightTable;

/// [`Model`] を構築するためのビルダー。
///
/// # 例
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use sparselin::{FeatureTemplate, ModelBuilder};
///
/// let mut model = ModelBuilder::new(3, vec![FeatureTemplate::new([0])])
///     .averaging(true)
///     .build()?;
///
/// model.update(&[7], 0, 1, 1.0)?;
/// assert_eq!(model.score(&[7], false)?, vec![-1.0, 1.0, 0.0]);
/// assert_eq!(model.predict(&[7])?, 1);
/// # Ok(())
/// # }
/// ```
pub struct ModelBuilder {
    n_classes: usize,
    templates: Vec<FeatureTemplate>,
    n_atoms: Option<usize>,
    bias: bool,
    absent_policy: AbsentPolicy,
    averaging: bool,
    regularization: f32,
}

impl ModelBuilder {
    /// 新しいビルダーを作成します。
    ///
    /// # 引数
    ///
    /// * `n_classes` - クラス数
    /// * `templates` - 素性テンプレート
    pub const fn new(n_classes: usize, templates: Vec<FeatureTemplate>) -> Self {
        Self {
            n_classes,
            templates,
            n_atoms: None,
            bias: false,
            absent_policy: AbsentPolicy::SkipAllAbsent,
            averaging: false,
            regularization: 1.0,
        }
    }

    /// 素性定義ファイル `feature.def` からビルダーを作成します。
    ///
    /// `CONTEXT` と `BIAS` の指定もビルダーに反映されます。
    ///
    /// # 引数
    ///
    /// * `n_classes` - クラス数
    /// * `rdr` - `feature.def` のリーダー
    ///
    /// # エラー
    ///
    /// ファイル形式が不正な場合、[`SparselinError`] が返されます。
    pub fn from_reader<R>(n_classes: usize, rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let TemplateSet {
            templates,
            n_atoms,
            bias,
        } = TemplateSet::from_reader(rdr)?;
        let mut builder = Self::new(n_classes, templates).bias(bias);
        builder.n_atoms = n_atoms;
        Ok(builder)
    }

    /// コンテキスト長を明示します。
    ///
    /// デフォルトでは、テンプレートが参照する最大の位置から導出されます。
    pub const fn n_atoms(mut self, n_atoms: usize) -> Self {
        self.n_atoms = Some(n_atoms);
        self
    }

    /// 常に有効なバイアス素性を追加するかどうかを指定します。
    ///
    /// デフォルト値は `false` です。
    pub const fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// 値なしアトムの扱い方を指定します。
    ///
    /// デフォルト値は [`AbsentPolicy::SkipAllAbsent`] です。
    pub const fn absent_policy(mut self, policy: AbsentPolicy) -> Self {
        self.absent_policy = policy;
        self
    }

    /// 重みの平均化を有効化します。
    ///
    /// 有効な場合、[`Model::write_weights`] は平均化された重みを出力します。
    /// デフォルト値は `false` です。
    pub const fn averaging(mut self, averaging: bool) -> Self {
        self.averaging = averaging;
        self
    }

    /// `regularize` 付きのスコア計算で使う正則化定数を指定します。
    ///
    /// スコアはこの値で割られます。デフォルト値は 1.0 です。
    pub const fn regularization(mut self, constant: f32) -> Self {
        self.regularization = constant;
        self
    }

    /// モデルを構築します。
    ///
    /// # エラー
    ///
    /// 以下の場合に [`SparselinError::Configuration`] が返されます。
    ///
    /// - クラス数が 0、または `u32` に収まらない場合
    /// - テンプレートが空、またはアトムを参照しないテンプレートがある場合
    /// - コンテキスト長がテンプレートの参照する位置を含まない場合
    /// - 正則化定数が正の有限値でない場合
    pub fn build(self) -> Result<Model> {
        if self.n_classes == 0 {
            return Err(SparselinError::configuration(
                "n_classes",
                "must be positive",
            ));
        }
        let n_classes = u32::try_from(self.n_classes)
            .map_err(|_| SparselinError::configuration("n_classes", "too many classes"))?;
        if !(self.regularization.is_finite() && self.regularization > 0.0) {
            return Err(SparselinError::configuration(
                "regularization",
                format!("must be a positive finite number, but got {}", self.regularization),
            ));
        }
        let extractor =
            FeatureExtractor::new(self.templates, self.n_atoms, self.absent_policy, self.bias)?;

        log::debug!(
            "built a model: n_classes={}, templates={}, n_atoms={}, averaging={}",
            n_classes,
            extractor.templates().len(),
            extractor.n_atoms(),
            self.averaging,
        );

        Ok(Model::from_data(ModelData {
            n_classes,
            regularization: self.regularization,
            timestep: 0,
            weights: WeightTable::new(self.n_classes, self.averaging),
            extractor,
        }))
    }
}

/// モデルデータ。
///
/// 学習チェックポイントとしてシリアライズされる部分です。
#[derive(Clone, Archive, Serialize, Deserialize)]
pub struct ModelData {
    pub(crate) n_classes: u32,
    pub(crate) regularization: f32,
    pub(crate) timestep: u64,
    pub(crate) extractor: FeatureExtractor,
    pub(crate) weights: WeightTable,
}

/// スコア計算のための作業領域。
///
/// 素性とスコアのバッファを保持し、呼び出しごとの再割り当てを避けます。
/// 1つのスレッドで1つずつ使ってください。
#[derive(Default)]
pub struct Scratch {
    features: Vec<Feature>,
    scores: Vec<f32>,
}

impl Scratch {
    /// 空の作業領域を作成します。
    pub fn new() -> Self {
        Self::default()
    }

    /// 直前の呼び出しで抽出された素性を返します。
    pub fn features(&self) -> &[Feature] {
        &self.features
    }
}

/// 疎な線形モデル。
///
/// スコア計算は `&self` で行えるため、複数スレッドから同時に呼び出せます。
/// 更新は `&mut self` を必要とします。並列に学習する場合は
/// [`Model::into_shared`] を使ってください。
pub struct Model {
    pub(crate) data: ModelData,

    // Reused by update() to avoid allocating per call.
    features: Vec<Feature>,
}

impl Model {
    pub(crate) fn from_data(data: ModelData) -> Self {
        let features = Vec::with_capacity(data.extractor.max_features());
        Self { data, features }
    }

    /// クラス数を返します。
    #[inline(always)]
    pub fn n_classes(&self) -> usize {
        self.data.weights.n_classes()
    }

    /// コンテキスト長を返します。
    #[inline(always)]
    pub fn n_atoms(&self) -> usize {
        self.data.extractor.n_atoms()
    }

    /// 更新の回数（時刻）を返します。
    #[inline(always)]
    pub const fn timestep(&self) -> u64 {
        self.data.timestep
    }

    /// 重みの平均化が有効かどうかを返します。
    #[inline(always)]
    pub const fn is_averaging(&self) -> bool {
        self.data.weights.is_averaging()
    }

    /// 正則化定数を返します。
    pub const fn regularization(&self) -> f32 {
        self.data.regularization
    }

    /// 素性抽出器を返します。
    pub const fn extractor(&self) -> &FeatureExtractor {
        &self.data.extractor
    }

    /// 重み表を返します。
    pub const fn weights(&self) -> &WeightTable {
        &self.data.weights
    }

    /// コンテキストのスコアを作業領域に計算します。
    ///
    /// # 引数
    ///
    /// * `scratch` - 作業領域
    /// * `context` - コンテキスト
    /// * `regularize` - スコアを正則化定数で割るかどうか
    ///
    /// # 戻り値
    ///
    /// 長さ `n_classes` のスコアベクトル
    ///
    /// # エラー
    ///
    /// コンテキスト長が一致しない場合、[`SparselinError::InputContract`] が返されます。
    pub fn score_with<'a>(
        &self,
        scratch: &'a mut Scratch,
        context: &[Atom],
        regularize: bool,
    ) -> Result<&'a [f32]> {
        self.data.extractor.extract(context, &mut scratch.features)?;
        scratch.scores.clear();
        scratch.scores.resize(self.n_classes(), 0.0);
        scorer::accumulate(&self.data.weights, &scratch.features, &mut scratch.scores);
        if regularize {
            scorer::regularize(&mut scratch.scores, self.data.regularization);
        }
        Ok(&scratch.scores)
    }

    /// コンテキストのスコアを計算します。
    ///
    /// 重み表は変更しません。同じ重みと同じコンテキストに対しては、
    /// 常にビット単位で同一の結果を返します。
    ///
    /// # 引数
    ///
    /// * `context` - コンテキスト
    /// * `regularize` - スコアを正則化定数で割るかどうか
    ///
    /// # 戻り値
    ///
    /// 長さ `n_classes` のスコアベクトル
    ///
    /// # エラー
    ///
    /// コンテキスト長が一致しない場合、[`SparselinError::InputContract`] が返されます。
    pub fn score(&self, context: &[Atom], regularize: bool) -> Result<Vec<f32>> {
        let mut scratch = Scratch {
            features: Vec::with_capacity(self.data.extractor.max_features()),
            scores: Vec::with_capacity(self.n_classes()),
        };
        self.score_with(&mut scratch, context, regularize)?;
        Ok(scratch.scores)
    }

    /// 最もスコアの高いクラスを返します。同点の場合は小さいインデックスが選ばれます。
    ///
    /// # エラー
    ///
    /// コンテキスト長が一致しない場合、[`SparselinError::InputContract`] が返されます。
    pub fn predict(&self, context: &[Atom]) -> Result<usize> {
        scorer::arg_max(&self.score(context, false)?)
    }

    pub(crate) fn check_class(&self, arg: &'static str, class: usize) -> Result<()> {
        if class < self.n_classes() {
            Ok(())
        } else {
            Err(SparselinError::class_out_of_range(arg, class, self.n_classes()))
        }
    }

    /// コスト考慮型パーセプトロンの規則で重みを更新します。
    ///
    /// `guess != gold` の場合、有効な各素性について正解クラスの重みに `cost` を加え、
    /// 予測クラスの重みから `cost` を引きます。`guess == gold` の場合、重みは変わりません。
    /// どちらの場合も時刻は1つ進みます。
    ///
    /// # 引数
    ///
    /// * `context` - 直前にスコアを計算したコンテキスト
    /// * `guess` - 予測されたクラス
    /// * `gold` - 正解クラス
    /// * `cost` - `guess` を予測したことによる損失（0以上）
    ///
    /// # エラー
    ///
    /// 以下の場合にエラーが返され、モデルは変更されません。
    ///
    /// - `guess` または `gold` が範囲外の場合: [`SparselinError::ClassOutOfRange`]
    /// - `cost` が負または有限値でない場合: [`SparselinError::InvalidArgument`]
    /// - コンテキスト長が一致しない場合: [`SparselinError::InputContract`]
    ///
    /// # パニック
    ///
    /// 重み表の行数が `u32::MAX` を超える場合、パニックします。
    pub fn update(&mut self, context: &[Atom], guess: usize, gold: usize, cost: f32) -> Result<()> {
        self.check_class("guess", guess)?;
        self.check_class("gold", gold)?;
        if !(cost.is_finite() && cost >= 0.0) {
            return Err(SparselinError::invalid_argument(
                "cost",
                format!("must be a non-negative finite number, but got {cost}"),
            ));
        }
        self.data.extractor.extract(context, &mut self.features)?;

        let t = self.data.timestep;
        if guess != gold {
            for feature in &self.features {
                self.data.weights.add(feature.hash, gold, cost, t);
                self.data.weights.add(feature.hash, guess, -cost, t);
            }
        }
        self.data.timestep += 1;
        Ok(())
    }

    /// 平均化された重みを持つ、平均化無効のモデルを作成します。
    ///
    /// 平均化が無効なモデルでは、重みをそのまま複製します。
    pub fn averaged(&self) -> Self {
        if self.data.timestep == 0 && self.is_averaging() {
            log::warn!("averaging a model that has never been updated");
        }
        Self::from_data(ModelData {
            n_classes: self.data.n_classes,
            regularization: self.data.regularization,
            timestep: self.data.timestep,
            extractor: self.data.extractor.clone(),
            weights: self.data.weights.averaged(self.data.timestep),
        })
    }

    /// 並列学習のための共有モデルに変換します。
    ///
    /// # 引数
    ///
    /// * `n_shards` - 重み表の分割数（1以上）
    ///
    /// # エラー
    ///
    /// `n_shards` が 0 の場合、[`SparselinError::InvalidArgument`] が返されます。
    pub fn into_shared(self, n_shards: usize) -> Result<SharedModel> {
        SharedModel::new(self.data, n_shards)
    }
}
