//! 素性テンプレートの定義と `feature.def` の解析
//!
//! `feature.def` は次の形式の行からなるテキストファイルです。
//!
//! ```text
//! # 空行と # で始まる行は無視されます
//! CONTEXT 4
//! BIAS
//! TEMPLATE $1
//! TEMPLATE $1 $2
//! ```
//!
//! `$N` はコンテキストの N 番目（1始まり）のアトムを参照します。

use std::io::{BufRead, BufReader, Read};
use std::sync::LazyLock;

use regex::Regex;
use rkyv::{Archive, Deserialize, Serialize};

use crate::errors::{Result, SparselinError};

static REF_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\$([0-9]+)$").unwrap());

/// 組み合わせるアトムの位置を指定する素性テンプレート。
#[derive(Clone, Debug, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FeatureTemplate {
    positions: Vec<u32>,
}

impl FeatureTemplate {
    /// アトムの位置（0始まり）のリストからテンプレートを作成します。
    ///
    /// 空のテンプレートはモデル構築時に構成エラーになります。
    pub fn new<I>(positions: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        Self {
            positions: positions.into_iter().collect(),
        }
    }

    /// 参照するアトムの位置を返します。
    #[inline(always)]
    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    /// このテンプレートが必要とするコンテキストの最小長を返します。
    pub(crate) fn min_context_len(&self) -> usize {
        self.positions
            .iter()
            .max()
            .map_or(0, |&p| usize::try_from(p).unwrap_or(usize::MAX).saturating_add(1))
    }
}

/// `feature.def` から読み込まれたテンプレート構成。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateSet {
    /// 素性テンプレート
    pub templates: Vec<FeatureTemplate>,

    /// `CONTEXT` 行で明示されたコンテキスト長
    pub n_atoms: Option<usize>,

    /// `BIAS` 行の有無
    pub bias: bool,
}

impl TemplateSet {
    /// `TEMPLATE` 行の引数を解析します。
    fn parse_template(args: &str) -> Result<FeatureTemplate> {
        let mut positions = vec![];
        for arg in args.split_ascii_whitespace() {
            let cap = REF_PATTERN.captures(arg).ok_or_else(|| {
                SparselinError::invalid_format(
                    "feature.def",
                    format!("invalid atom reference: {arg}"),
                )
            })?;
            let idx: u32 = cap[1].parse()?;
            if idx == 0 {
                return Err(SparselinError::invalid_format(
                    "feature.def",
                    "atom references start from $1",
                ));
            }
            positions.push(idx - 1);
        }
        if positions.is_empty() {
            return Err(SparselinError::invalid_format(
                "feature.def",
                "TEMPLATE requires at least one atom reference",
            ));
        }
        Ok(FeatureTemplate::new(positions))
    }

    /// `feature.def` を読み込みます。
    ///
    /// # 引数
    ///
    /// * `rdr` - 素性定義ファイルのリーダー
    ///
    /// # 戻り値
    ///
    /// 読み込まれたテンプレート構成
    ///
    /// # エラー
    ///
    /// ファイル形式が不正な場合、[`SparselinError`] が返されます。
    pub fn from_reader<R>(rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let reader = BufReader::new(rdr);

        let mut set = Self::default();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line == "BIAS" {
                set.bias = true;
            } else if let Some(args) = line.strip_prefix("TEMPLATE ") {
                set.templates.push(Self::parse_template(args)?);
            } else if let Some(n) = line.strip_prefix("CONTEXT ") {
                if set.n_atoms.is_some() {
                    return Err(SparselinError::invalid_format(
                        "feature.def",
                        "CONTEXT is given more than once",
                    ));
                }
                set.n_atoms = Some(n.trim().parse()?);
            } else {
                return Err(SparselinError::invalid_format(
                    "feature.def",
                    format!("unknown directive: {line}"),
                ));
            }
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feature_def() {
        let def = "\
# word and tag context
CONTEXT 4

TEMPLATE $1
TEMPLATE $1 $3
BIAS
";
        let set = TemplateSet::from_reader(def.as_bytes()).unwrap();
        assert_eq!(
            vec![FeatureTemplate::new([0]), FeatureTemplate::new([0, 2])],
            set.templates
        );
        assert_eq!(Some(4), set.n_atoms);
        assert!(set.bias);
    }

    #[test]
    fn test_parse_invalid_reference() {
        let result = TemplateSet::from_reader("TEMPLATE $1 w2".as_bytes());
        assert!(matches!(result, Err(SparselinError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_zero_reference() {
        let result = TemplateSet::from_reader("TEMPLATE $0".as_bytes());
        assert!(matches!(result, Err(SparselinError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_unknown_directive() {
        let result = TemplateSet::from_reader("UNIGRAM $1".as_bytes());
        assert!(matches!(result, Err(SparselinError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_duplicated_context() {
        let result = TemplateSet::from_reader("CONTEXT 2\nCONTEXT 3".as_bytes());
        assert!(matches!(result, Err(SparselinError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_invalid_number() {
        let result = TemplateSet::from_reader("CONTEXT two".as_bytes());
        assert!(matches!(result, Err(SparselinError::ParseInt(_))));

        let result = TemplateSet::from_reader("TEMPLATE $99999999999".as_bytes());
        assert!(matches!(result, Err(SparselinError::ParseInt(_))));
    }

    #[test]
    fn test_min_context_len() {
        assert_eq!(5, FeatureTemplate::new([4, 1]).min_context_len());
        assert_eq!(0, FeatureTemplate::new([]).min_context_len());
    }
}
