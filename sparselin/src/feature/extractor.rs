//! 素性抽出器
//!
//! 各テンプレートが参照するアトムを連結して xxh64 でハッシュ化します。
//! シードにはテンプレートIDを用いるため、同じアトム値でもテンプレートが異なれば
//! 別の素性になります。

use rkyv::{Archive, Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::errors::{Result, SparselinError};
use crate::feature::{ABSENT_ATOM, Atom, Feature, FeatureTemplate};
use crate::utils::FromU32;

/// 値なしアトム（[`ABSENT_ATOM`]）の扱い方。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum AbsentPolicy {
    /// テンプレートが参照するアトムがすべて値なしの場合に素性を生成しません。
    ///
    /// 一部だけが値なしの場合は、値なしを 0 というキーとしてハッシュ化します。
    #[default]
    SkipAllAbsent,

    /// テンプレートが参照するアトムが1つでも値なしなら素性を生成しません。
    SkipAnyAbsent,

    /// 素性を抑制せず、値なしを 0 というキーとしてハッシュ化します。
    Keep,
}

/// 固定長のコンテキストから素性を抽出する抽出器。
///
/// 抽出は入力とテンプレート構成だけで決まる純粋な処理で、重み表には触れません。
#[derive(Clone, Debug, Archive, Serialize, Deserialize)]
pub struct FeatureExtractor {
    templates: Vec<FeatureTemplate>,
    n_atoms: u32,
    absent_policy: AbsentPolicy,
    bias: bool,
}

impl FeatureExtractor {
    /// 新しい抽出器を作成します。
    ///
    /// # 引数
    ///
    /// * `templates` - 素性テンプレート
    /// * `n_atoms` - コンテキスト長。`None` の場合はテンプレートから導出します。
    /// * `absent_policy` - 値なしアトムの扱い方
    /// * `bias` - バイアス素性を常に生成するかどうか
    ///
    /// # エラー
    ///
    /// 以下の場合に [`SparselinError::Configuration`] が返されます。
    ///
    /// - テンプレートが1つもない場合
    /// - アトムを参照しないテンプレートがある場合
    /// - `n_atoms` がテンプレートの参照する位置を含まない場合
    pub fn new(
        templates: Vec<FeatureTemplate>,
        n_atoms: Option<usize>,
        absent_policy: AbsentPolicy,
        bias: bool,
    ) -> Result<Self> {
        if templates.is_empty() {
            return Err(SparselinError::configuration(
                "templates",
                "at least one feature template is required",
            ));
        }
        if let Some(i) = templates.iter().position(|t| t.positions().is_empty()) {
            return Err(SparselinError::configuration(
                "templates",
                format!("template {i} references no atoms"),
            ));
        }
        // Template ids are u32 and the bias takes the id after the last template.
        if u32::try_from(templates.len()).is_err() {
            return Err(SparselinError::configuration(
                "templates",
                "too many feature templates",
            ));
        }
        let required = templates
            .iter()
            .map(FeatureTemplate::min_context_len)
            .max()
            .unwrap_or(0);
        let n_atoms = match n_atoms {
            Some(n) if n < required => {
                return Err(SparselinError::configuration(
                    "n_atoms",
                    format!("templates reference {required} atoms, but the context has {n}"),
                ));
            }
            Some(n) => n,
            None => required,
        };
        let n_atoms = u32::try_from(n_atoms)
            .map_err(|_| SparselinError::configuration("n_atoms", "context is too long"))?;

        Ok(Self {
            templates,
            n_atoms,
            absent_policy,
            bias,
        })
    }

    /// デシリアライズされた構成が [`Self::new`] の条件を満たすかを確認します。
    pub(crate) fn is_consistent(&self) -> bool {
        !self.templates.is_empty()
            && u32::try_from(self.templates.len()).is_ok()
            && self.templates.iter().all(|t| {
                !t.positions().is_empty() && t.min_context_len() <= self.n_atoms()
            })
    }

    /// 1回の抽出で期待されるアトム数を返します。
    #[inline(always)]
    pub fn n_atoms(&self) -> usize {
        usize::from_u32(self.n_atoms)
    }

    /// 素性テンプレートを返します。
    pub fn templates(&self) -> &[FeatureTemplate] {
        &self.templates
    }

    /// 値なしアトムの扱い方を返します。
    pub const fn absent_policy(&self) -> AbsentPolicy {
        self.absent_policy
    }

    /// バイアス素性が有効かどうかを返します。
    pub const fn bias(&self) -> bool {
        self.bias
    }

    /// バイアス素性のテンプレートIDを返します。
    ///
    /// 最後のテンプレートの次のIDが割り当てられます。
    pub fn bias_template_id(&self) -> u32 {
        // Checked in new().
        self.templates.len() as u32
    }

    /// 1回の抽出で生成されうる素性の最大数を返します。
    pub fn max_features(&self) -> usize {
        self.templates.len() + usize::from(self.bias)
    }

    #[inline(always)]
    fn is_suppressed(&self, atoms: &[Atom], template: &FeatureTemplate) -> bool {
        match self.absent_policy {
            AbsentPolicy::SkipAllAbsent => template
                .positions()
                .iter()
                .all(|&p| atoms[usize::from_u32(p)] == ABSENT_ATOM),
            AbsentPolicy::SkipAnyAbsent => template
                .positions()
                .iter()
                .any(|&p| atoms[usize::from_u32(p)] == ABSENT_ATOM),
            AbsentPolicy::Keep => false,
        }
    }

    /// コンテキストから素性を抽出します。
    ///
    /// `out` は最初にクリアされ、抑制されなかったテンプレートの素性がテンプレート順に、
    /// 最後にバイアス素性（有効な場合）が追加されます。
    ///
    /// # 引数
    ///
    /// * `atoms` - コンテキスト
    /// * `out` - 抽出された素性の格納先
    ///
    /// # エラー
    ///
    /// `atoms` の長さが [`Self::n_atoms`] と異なる場合、
    /// [`SparselinError::InputContract`] が返されます。
    pub fn extract(&self, atoms: &[Atom], out: &mut Vec<Feature>) -> Result<()> {
        out.clear();
        if atoms.len() != self.n_atoms() {
            return Err(SparselinError::input_contract(self.n_atoms(), atoms.len()));
        }
        for (template_id, template) in (0u32..).zip(&self.templates) {
            if self.is_suppressed(atoms, template) {
                continue;
            }
            let mut hasher = Xxh64::new(u64::from(template_id));
            for &p in template.positions() {
                hasher.update(&atoms[usize::from_u32(p)].to_le_bytes());
            }
            out.push(Feature::new(template_id, hasher.digest()));
        }
        if self.bias {
            let template_id = self.bias_template_id();
            let hasher = Xxh64::new(u64::from(template_id));
            out.push(Feature::new(template_id, hasher.digest()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(policy: AbsentPolicy, bias: bool) -> FeatureExtractor {
        FeatureExtractor::new(
            vec![
                FeatureTemplate::new([0]),
                FeatureTemplate::new([1]),
                FeatureTemplate::new([0, 1]),
            ],
            None,
            policy,
            bias,
        )
        .unwrap()
    }

    #[test]
    fn test_extract_deterministic() {
        let ext = extractor(AbsentPolicy::default(), false);
        let mut a = vec![];
        let mut b = vec![];
        ext.extract(&[3, 7], &mut a).unwrap();
        ext.extract(&[3, 7], &mut b).unwrap();
        assert_eq!(a, b);
        assert_eq!(3, a.len());
        assert_eq!(vec![0, 1, 2], a.iter().map(|f| f.template_id).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_atom_different_template() {
        let ext = extractor(AbsentPolicy::default(), false);
        let mut features = vec![];
        ext.extract(&[5, 5], &mut features).unwrap();
        assert_ne!(features[0].hash, features[1].hash);
    }

    #[test]
    fn test_skip_all_absent() {
        let ext = extractor(AbsentPolicy::SkipAllAbsent, false);
        let mut features = vec![];
        ext.extract(&[0, 7], &mut features).unwrap();
        assert_eq!(vec![1, 2], features.iter().map(|f| f.template_id).collect::<Vec<_>>());
        ext.extract(&[0, 0], &mut features).unwrap();
        assert!(features.is_empty());
    }

    #[test]
    fn test_skip_any_absent() {
        let ext = extractor(AbsentPolicy::SkipAnyAbsent, false);
        let mut features = vec![];
        ext.extract(&[0, 7], &mut features).unwrap();
        assert_eq!(vec![1], features.iter().map(|f| f.template_id).collect::<Vec<_>>());
    }

    #[test]
    fn test_keep_absent() {
        let ext = extractor(AbsentPolicy::Keep, false);
        let mut features = vec![];
        ext.extract(&[0, 0], &mut features).unwrap();
        assert_eq!(3, features.len());
    }

    #[test]
    fn test_bias() {
        let ext = extractor(AbsentPolicy::SkipAllAbsent, true);
        let mut features = vec![];
        ext.extract(&[0, 0], &mut features).unwrap();
        assert_eq!(1, features.len());
        assert_eq!(3, features[0].template_id);

        let mut other = vec![];
        ext.extract(&[1, 2], &mut other).unwrap();
        assert_eq!(features[0], *other.last().unwrap());
    }

    #[test]
    fn test_context_length_mismatch() {
        let ext = extractor(AbsentPolicy::default(), false);
        let mut features = vec![Feature::new(0, 0)];
        let result = ext.extract(&[1, 2, 3], &mut features);
        assert!(matches!(result, Err(SparselinError::InputContract(_))));
        assert!(features.is_empty());
    }

    #[test]
    fn test_explicit_context_length() {
        let ext = FeatureExtractor::new(
            vec![FeatureTemplate::new([1])],
            Some(4),
            AbsentPolicy::default(),
            false,
        )
        .unwrap();
        assert_eq!(4, ext.n_atoms());
        let mut features = vec![];
        ext.extract(&[0, 9, 0, 0], &mut features).unwrap();
        assert_eq!(1, features.len());
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(matches!(
            FeatureExtractor::new(vec![], None, AbsentPolicy::default(), false),
            Err(SparselinError::Configuration(_))
        ));
        assert!(matches!(
            FeatureExtractor::new(
                vec![FeatureTemplate::new([])],
                None,
                AbsentPolicy::default(),
                false
            ),
            Err(SparselinError::Configuration(_))
        ));
        assert!(matches!(
            FeatureExtractor::new(
                vec![FeatureTemplate::new([3])],
                Some(2),
                AbsentPolicy::default(),
                false
            ),
            Err(SparselinError::Configuration(_))
        ));
    }
}
