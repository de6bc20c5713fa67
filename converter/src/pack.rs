//! 学習チェックポイントの作成モジュール
//!
//! 素性定義ファイル `feature.def` とクラス数からモデルを構築し、
//! 三つ組形式の重みを読み込んで学習チェックポイントとして書き出します。
//! 書き出されたチェックポイントは、学習の初期値として読み込むことができます。

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use sparselin::errors::SparselinError;
use sparselin::{AbsentPolicy, ModelBuilder};

/// 値なしアトムの扱い方
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Absent {
    /// Suppresses a feature when all of its atoms are absent.
    SkipAll,
    /// Suppresses a feature when any of its atoms is absent.
    SkipAny,
    /// Never suppresses a feature.
    Keep,
}

impl From<Absent> for AbsentPolicy {
    fn from(absent: Absent) -> Self {
        match absent {
            Absent::SkipAll => Self::SkipAllAbsent,
            Absent::SkipAny => Self::SkipAnyAbsent,
            Absent::Keep => Self::Keep,
        }
    }
}

/// チェックポイント作成コマンドの引数
#[derive(Parser, Debug)]
#[clap(
    name = "pack",
    about = "A program to pack weight triples into a training checkpoint."
)]
pub struct Args {
    /// Feature definition file (feature.def).
    #[clap(short = 'f', long)]
    feature_def_in: PathBuf,

    /// Number of classes.
    #[clap(short = 'n', long)]
    n_classes: usize,

    /// Weight triples (feature_hash,class,weight).
    ///
    /// The checkpoint starts from zero weights if this argument is not specified.
    #[clap(short = 'w', long)]
    weights_in: Option<PathBuf>,

    /// File to which the training checkpoint is output.
    #[clap(short = 'o', long)]
    model_out: PathBuf,

    /// Keeps the accumulators for parameter averaging during further training.
    #[clap(long)]
    averaging: bool,

    /// Constant by which scores are divided when regularized scores are requested.
    #[clap(long, default_value_t = 1.0)]
    regularization: f32,

    /// How features over absent atoms are handled.
    #[clap(long, value_enum, default_value_t = Absent::SkipAll)]
    absent: Absent,
}

/// チェックポイント作成中に発生する可能性のあるエラー
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// 入出力エラー
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// モデル構築エラー
    #[error("Packing failed: {0}")]
    Sparselin(#[from] SparselinError),
}

/// チェックポイント作成コマンドを実行する
///
/// # エラー
///
/// ファイルの読み書き、素性定義の解析、重みの読み込みに失敗した場合、
/// `PackError`を返します。
pub fn run(args: Args) -> Result<(), PackError> {
    log::info!("Building a model from {}", args.feature_def_in.display());
    let mut model = ModelBuilder::from_reader(args.n_classes, File::open(&args.feature_def_in)?)?
        .averaging(args.averaging)
        .regularization(args.regularization)
        .absent_policy(args.absent.into())
        .build()?;

    if let Some(weights_in) = &args.weights_in {
        log::info!("Loading the weights from {}", weights_in.display());
        model.read_weights(File::open(weights_in)?)?;
    }
    log::info!(
        "{} features, {} classes, {} atoms per context",
        model.weights().len(),
        model.n_classes(),
        model.n_atoms(),
    );

    let mut wtr = BufWriter::new(File::create(&args.model_out)?);
    model.write_model(&mut wtr)?;
    wtr.flush()?;

    log::info!("Successfully packed the checkpoint to {}", args.model_out.display());
    Ok(())
}
