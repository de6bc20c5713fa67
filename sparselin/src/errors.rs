//! エラー型の定義
//!
//! このモジュールは、sparselinで使用されるすべてのエラー型を定義します。
//! いずれのエラーも呼び出し元へ同期的に返され、内部で再試行されることはありません。
//! 重みが存在しないことはエラーではなく、重み0として扱われます。

use std::error::Error;
use std::fmt;

/// sparselin専用のResult型
///
/// エラー型としてデフォルトで[`SparselinError`]を使用します。
pub type Result<T, E = SparselinError> = std::result::Result<T, E>;

/// sparselinのエラー型
#[derive(Debug, thiserror::Error)]
pub enum SparselinError {
    /// 構成エラー
    ///
    /// モデル構築時、または重み表の読み込み時に検出される致命的なエラーです。
    #[error(transparent)]
    Configuration(ConfigurationError),

    /// 入力契約エラー
    ///
    /// コンテキストの長さがテンプレート構成と一致しない場合に発生します。
    #[error(transparent)]
    InputContract(InputContractError),

    /// クラス範囲外エラー
    ///
    /// `guess` または `gold` が `[0, n_classes)` の外にある場合に発生します。
    #[error(transparent)]
    ClassOutOfRange(ClassOutOfRangeError),

    /// 無効な引数エラー
    #[error(transparent)]
    InvalidArgument(InvalidArgumentError),

    /// 無効なフォーマットエラー
    #[error(transparent)]
    InvalidFormat(InvalidFormatError),

    /// 無効な状態エラー
    #[error(transparent)]
    InvalidState(InvalidStateError),

    /// 整数パースエラー
    #[error(transparent)]
    ParseInt(std::num::ParseIntError),

    /// UTF-8エンコーディングエラー
    #[error(transparent)]
    Utf8(std::str::Utf8Error),

    /// I/Oエラー
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl SparselinError {
    /// 構成エラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - 問題のある設定項目の名前
    /// * `msg` - エラーメッセージ
    pub(crate) fn configuration<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::Configuration(ConfigurationError {
            arg,
            msg: msg.into(),
        })
    }

    pub(crate) const fn input_contract(expected: usize, actual: usize) -> Self {
        Self::InputContract(InputContractError { expected, actual })
    }

    pub(crate) const fn class_out_of_range(arg: &'static str, class: usize, n_classes: usize) -> Self {
        Self::ClassOutOfRange(ClassOutOfRangeError {
            arg,
            class,
            n_classes,
        })
    }

    /// 無効な引数エラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - 引数の名前
    /// * `msg` - エラーメッセージ
    pub(crate) fn invalid_argument<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidArgument(InvalidArgumentError {
            arg,
            msg: msg.into(),
        })
    }

    /// 無効なフォーマットエラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - フォーマット名
    /// * `msg` - エラーメッセージ
    pub(crate) fn invalid_format<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidFormat(InvalidFormatError {
            arg,
            msg: msg.into(),
        })
    }

    /// 無効な状態エラーを生成します
    ///
    /// # 引数
    ///
    /// * `msg` - エラーメッセージ
    /// * `cause` - エラーの原因
    pub(crate) fn invalid_state<S, M>(msg: S, cause: M) -> Self
    where
        S: Into<String>,
        M: Into<String>,
    {
        Self::InvalidState(InvalidStateError {
            msg: msg.into(),
            cause: cause.into(),
        })
    }
}

/// モデル構成が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct ConfigurationError {
    /// 設定項目の名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConfigurationError: {}: {}", self.arg, self.msg)
    }
}

impl Error for ConfigurationError {}

/// コンテキスト長が一致しない場合に使用されるエラー
#[derive(Debug)]
pub struct InputContractError {
    /// テンプレート構成が要求するアトム数
    pub(crate) expected: usize,

    /// 実際に渡されたアトム数
    pub(crate) actual: usize,
}

impl InputContractError {
    /// テンプレート構成が要求するアトム数を返します。
    pub const fn expected(&self) -> usize {
        self.expected
    }

    /// 実際に渡されたアトム数を返します。
    pub const fn actual(&self) -> usize {
        self.actual
    }
}

impl fmt::Display for InputContractError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "InputContractError: context must have {} atoms, but {} were given",
            self.expected, self.actual
        )
    }
}

impl Error for InputContractError {}

/// クラスインデックスが範囲外の場合に使用されるエラー
#[derive(Debug)]
pub struct ClassOutOfRangeError {
    /// 引数の名前
    pub(crate) arg: &'static str,

    /// 渡されたクラスインデックス
    pub(crate) class: usize,

    /// モデルのクラス数
    pub(crate) n_classes: usize,
}

impl ClassOutOfRangeError {
    /// 範囲外だったクラスインデックスを返します。
    pub const fn class(&self) -> usize {
        self.class
    }
}

impl fmt::Display for ClassOutOfRangeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ClassOutOfRangeError: {}: {} is not in [0, {})",
            self.arg, self.class, self.n_classes
        )
    }
}

impl Error for ClassOutOfRangeError {}

/// 引数が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidArgumentError {
    /// 引数の名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidArgumentError {}

/// 入力フォーマットが無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidFormatError {
    /// フォーマットの名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for InvalidFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidFormatError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidFormatError {}

/// 状態が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidStateError {
    /// エラーメッセージ
    pub(crate) msg: String,

    /// エラーの根本原因
    pub(crate) cause: String,
}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidStateError: {}: {}", self.msg, self.cause)
    }
}

impl Error for InvalidStateError {}

impl From<std::num::ParseIntError> for SparselinError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::ParseInt(error)
    }
}

impl From<std::str::Utf8Error> for SparselinError {
    fn from(error: std::str::Utf8Error) -> Self {
        Self::Utf8(error)
    }
}
