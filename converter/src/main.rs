//! sparselin モデル変換ツールのメインエントリーポイント
//!
//! 学習チェックポイントと重みの三つ組形式の相互変換を行うCLIツールです。

mod export;
mod pack;

use clap::Parser;
use thiserror::Error;

use crate::{export::ExportError, pack::PackError};

/// コマンドライン引数の構造体
#[derive(Parser, Debug)]
#[clap(name = "converter", version)]
struct Cli {
    /// 実行するサブコマンド
    #[clap(subcommand)]
    command: Command,
}

/// 利用可能なサブコマンド
#[derive(Parser, Debug)]
enum Command {
    /// 学習チェックポイントから重みを三つ組形式で書き出します
    ///
    /// 平均化が有効なモデルでは、平均化された重みが書き出されます。
    Export(export::Args),

    /// 素性定義と三つ組形式の重みから学習チェックポイントを作成します
    Pack(pack::Args),
}

/// 変換ツールの実行中に発生する可能性のあるエラー
#[derive(Debug, Error)]
pub enum ConvertError {
    /// 書き出し中のエラー
    #[error(transparent)]
    ExportError(#[from] ExportError),
    /// チェックポイント作成中のエラー
    #[error(transparent)]
    PackError(#[from] PackError),
}

/// メイン関数
///
/// ロガーを初期化し、指定されたサブコマンドを実行します。
/// ログの出力レベルは環境変数 `RUST_LOG` で指定します。
///
/// # エラー
///
/// 各サブコマンドの実行中にエラーが発生した場合、そのエラーが返されます。
fn main() -> Result<(), ConvertError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Export(args) => Ok(export::run(args)?),
        Command::Pack(args) => Ok(pack::run(args)?),
    }
}
