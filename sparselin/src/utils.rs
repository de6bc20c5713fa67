//! ユーティリティ関数と型変換トレイトを提供するモジュール
//!
//! - `FromU32`: u32からの型変換トレイト
//! - CSV行の解析

use csv_core::ReadFieldResult;

use crate::errors::Result;

/// u32から他の型への変換を提供するトレイト
///
/// 重み表の行番号は `u32` で保持し、配列の添字として使う際に `usize` へ変換します。
pub trait FromU32 {
    /// u32値から実装型を生成する
    fn from_u32(src: u32) -> Self;
}

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl FromU32 for usize {
    #[inline(always)]
    fn from_u32(src: u32) -> Self {
        // Since the pointer width is guaranteed to be 32 or 64,
        // the following process always succeeds.
        unsafe { Self::try_from(src).unwrap_unchecked() }
    }
}

/// CSV形式の行を解析してフィールドのベクターに分割する
///
/// ダブルクォートで囲まれたフィールドや、フィールド内のカンマも正しく処理します。
///
/// # 引数
///
/// * `row` - 解析するCSV形式の文字列
///
/// # 戻り値
///
/// 解析されたフィールドを格納する文字列のベクター
///
/// # エラー
///
/// フィールドがUTF-8として不正な場合、[`SparselinError`](crate::errors::SparselinError) が返されます。
///
/// # 例
///
/// ```
/// # use sparselin::utils::parse_csv_row;
/// let fields = parse_csv_row("42,1,-0.5").unwrap();
/// assert_eq!(fields, vec!["42", "1", "-0.5"]);
/// ```
pub fn parse_csv_row(row: &str) -> Result<Vec<String>> {
    let mut fields = vec![];
    let mut rdr = csv_core::Reader::new();
    let mut bytes = row.as_bytes();
    let mut output = [0; 4096];
    loop {
        let (result, nin, nout) = rdr.read_field(bytes, &mut output);
        let end = match result {
            ReadFieldResult::InputEmpty | ReadFieldResult::End => true,
            ReadFieldResult::Field { .. } => false,
            ReadFieldResult::OutputFull => {
                return Err(crate::errors::SparselinError::invalid_format(
                    "csv",
                    "field is too long",
                ));
            }
        };
        fields.push(std::str::from_utf8(&output[..nout])?.to_string());
        if end {
            break;
        }
        bytes = &bytes[nin..];
    }
    Ok(fields)
}
