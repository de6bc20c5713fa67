//! # sparselin
//!
//! sparselinは、テンプレートから作られる疎な素性に対する線形スコア計算器と、
//! コスト考慮型の平均化パーセプトロンによる学習の実装です。
//!
//! ## 概要
//!
//! 系列ラベリングや遷移ベースの構文解析器の内側のループで使われることを想定しています。
//! 呼び出し側はアトム（整数の観測値）の配列をコンテキストとして渡し、
//! 各クラスのスコアを受け取ります。学習時には、予測したクラスと正解クラスを
//! 渡して重みを更新します。
//!
//! ## 主な機能
//!
//! - **素性抽出**: テンプレートが参照するアトムの組をハッシュ化した素性の生成
//! - **スコア計算**: 重み表の行を足し合わせる線形スコア計算と arg max デコード
//! - **平均化パーセプトロン**: 遅延評価による平均化付きのコスト考慮型更新
//! - **並列学習**: シャード化された重み表による複数スレッドからの同時更新
//! - **入出力**: 三つ組形式の重みの読み書きと、rkyvによる学習チェックポイント
//!
//! ## 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use sparselin::{FeatureTemplate, ModelBuilder};
//!
//! let feature_def = "CONTEXT 2\nTEMPLATE $1\nTEMPLATE $1 $2\n";
//! let mut model = ModelBuilder::from_reader(3, feature_def.as_bytes())?
//!     .averaging(true)
//!     .build()?;
//! assert_eq!(model.n_atoms(), 2);
//!
//! let context = [10, 20];
//! let guess = model.predict(&context)?;
//! assert_eq!(guess, 0);
//!
//! model.update(&context, guess, 2, 1.0)?;
//! assert_eq!(model.score(&context, false)?, vec![-2.0, 0.0, 2.0]);
//! assert_eq!(model.predict(&context)?, 2);
//!
//! let mut triples = vec![];
//! model.write_weights(&mut triples)?;
//! assert_eq!(String::from_utf8(triples)?.lines().count(), 4);
//! # Ok(())
//! # }
//! ```

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("`target_pointer_width` must be 32 or 64");

/// エラー型の定義
pub mod errors;

/// 素性テンプレートと素性抽出
pub mod feature;

/// モデルの構築・スコア計算・更新
pub mod model;

/// 線形スコア計算とデコード
pub mod scorer;

/// 並列学習のための共有モデル
pub mod shared;

/// 内部ユーティリティ関数
pub mod utils;

/// 疎な重み表
pub mod weights;

#[cfg(test)]
mod tests;

// Re-exports
pub use errors::{Result, SparselinError};
pub use feature::{AbsentPolicy, Atom, FeatureTemplate, ABSENT_ATOM};
pub use model::{Model, ModelBuilder, Scratch};
pub use shared::SharedModel;

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
