//! 線形スコア計算とデコード

use crate::errors::{Result, SparselinError};
use crate::feature::Feature;
use crate::weights::WeightTable;

/// 有効な素性の重みの行をスコアベクトルに足し込みます。
///
/// 重み表に存在しない素性は全クラスに 0 を寄与するため、何もしません。
/// 同じ素性が複数回現れた場合は、その回数だけ足し込まれます。
///
/// # パニック
///
/// `scores` の長さが重み表のクラス数と異なる場合、パニックします。
#[inline(always)]
pub fn accumulate(table: &WeightTable, features: &[Feature], scores: &mut [f32]) {
    assert_eq!(scores.len(), table.n_classes());
    for feature in features {
        if let Some(row) = table.row(feature.hash) {
            for (s, &w) in scores.iter_mut().zip(row) {
                *s += w;
            }
        }
    }
}

/// スコアを正則化定数で割ります。
///
/// 評価用に較正されたスコアを得るためのもので、重み表は変更しません。
#[inline(always)]
pub fn regularize(scores: &mut [f32], constant: f32) {
    for s in scores {
        *s /= constant;
    }
}

/// 最大のスコアを持つクラスを返します。
///
/// 同点の場合は最も小さいインデックスが選ばれます。NaN が選ばれることはありません
/// （すべて NaN の場合は 0 を返します）。
///
/// # エラー
///
/// `scores` が空の場合、[`SparselinError::Configuration`] が返されます。
/// これはクラス数が 0 のモデルでしか起こりません。
pub fn arg_max(scores: &[f32]) -> Result<usize> {
    let Some((&first, rest)) = scores.split_first() else {
        return Err(SparselinError::configuration(
            "n_classes",
            "cannot decode an empty score vector",
        ));
    };
    let mut best = 0;
    let mut best_score = first;
    for (i, &s) in rest.iter().enumerate() {
        // Strict comparison keeps the first occurrence; NaN compares false.
        if s > best_score || (best_score.is_nan() && !s.is_nan()) {
            best = i + 1;
            best_score = s;
        }
    }
    Ok(best)
}
