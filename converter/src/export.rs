//! 重みの書き出しモジュール
//!
//! 学習チェックポイントを読み込み、重みを三つ組 `feature_hash,class,weight`
//! の形式で書き出します。

use std::fs::File;
use std::io;
use std::path::PathBuf;

use clap::Parser;
use sparselin::Model;
use sparselin::errors::SparselinError;

/// 書き出しコマンドの引数
#[derive(Parser, Debug)]
#[clap(
    name = "export",
    about = "A program to export weight triples from a training checkpoint."
)]
pub struct Args {
    /// Training checkpoint written by `pack` or `Model::write_model`.
    #[clap(short = 'i', long)]
    pub(crate) model_in: PathBuf,

    /// File to which the weight triples are output.
    ///
    /// The triples are written to stdout if this argument is not specified.
    #[clap(short = 'o', long)]
    pub(crate) weights_out: Option<PathBuf>,
}

/// 書き出し処理中に発生する可能性のあるエラー
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// 入出力エラー
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// モデルの読み書きエラー
    #[error("Export failed: {0}")]
    Sparselin(#[from] SparselinError),
}

/// 書き出しコマンドを実行する
///
/// # エラー
///
/// ファイルの読み書きやチェックポイントの読み込みに失敗した場合、`ExportError`を返します。
pub fn run(args: Args) -> Result<(), ExportError> {
    log::info!("Loading the checkpoint from {}", args.model_in.display());
    let model = Model::read_model(File::open(&args.model_in)?)?;
    if model.is_averaging() {
        log::info!("Averaging over {} updates", model.timestep());
    }

    match &args.weights_out {
        Some(path) => {
            model.write_weights(File::create(path)?)?;
            log::info!("Successfully exported the weights to {}", path.display());
        }
        None => model.write_weights(io::stdout().lock())?,
    }
    Ok(())
}
