//! 素性の定義と抽出
//!
//! 外部から与えられる固定長のアトム列（コンテキスト）を、テンプレートに従って
//! ハッシュ化された素性の集合に変換します。素性は呼び出しごとに再計算される
//! 一時的な値で、重み表にはハッシュ値だけがキーとして格納されます。

pub mod extractor;
pub mod template;

pub use extractor::{AbsentPolicy, FeatureExtractor};
pub use template::{FeatureTemplate, TemplateSet};

/// コンテキストを構成する1つの離散化された観測値。
pub type Atom = u64;

/// 「値なし」を表す予約済みのアトム。
///
/// 系列の境界など、観測が存在しない位置に置かれます。
pub const ABSENT_ATOM: Atom = 0;

/// テンプレートから生成された1つの素性。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Feature {
    /// 素性を生成したテンプレートのID
    pub template_id: u32,

    /// 重み表のキーとなるハッシュ値
    pub hash: u64,
}

impl Feature {
    /// 新しい素性を作成します。
    #[inline(always)]
    pub const fn new(template_id: u32, hash: u64) -> Self {
        Self { template_id, hash }
    }
}
