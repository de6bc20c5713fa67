use std::fs::File;

use tempfile::NamedTempFile;

use crate::errors::SparselinError;
use crate::feature::FeatureTemplate;
use crate::model::{Model, ModelBuilder};

const FEATURE_DEF: &str = include_str!("./resources/feature.def");

const CONTEXTS: [[u64; 3]; 4] = [[1, 2, 3], [3, 2, 1], [0, 5, 6], [1, 5, 0]];

fn builder() -> ModelBuilder {
    ModelBuilder::from_reader(3, FEATURE_DEF.as_bytes()).unwrap()
}

fn train(model: &mut Model) {
    for (i, context) in CONTEXTS.iter().enumerate() {
        let gold = i % 3;
        let guess = model.predict(context).unwrap();
        model.update(context, guess, gold, 1.0).unwrap();
    }
}

fn export(model: &Model) -> String {
    let mut buf = vec![];
    model.write_weights(&mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

/// 三つ組形式での書き出しと読み込みのテスト
#[test]
fn test_weights_round_trip() {
    let mut model = builder().build().unwrap();
    train(&mut model);

    let triples = export(&model);
    assert!(triples.lines().all(|line| line.split(',').count() == 3));

    let mut restored = builder().build().unwrap();
    restored.read_weights(triples.as_bytes()).unwrap();
    for context in CONTEXTS {
        assert_eq!(
            model.score(&context, false).unwrap(),
            restored.score(&context, false).unwrap()
        );
    }
}

/// 平均化が有効な場合は平均化された重みが書き出されることのテスト
#[test]
fn test_write_averaged_weights() {
    let mut model = builder().averaging(true).build().unwrap();
    train(&mut model);
    let averaged = model.averaged();

    let mut restored = builder().build().unwrap();
    restored.read_weights(export(&model).as_bytes()).unwrap();
    for context in CONTEXTS {
        let expected = averaged.score(&context, false).unwrap();
        let actual = restored.score(&context, false).unwrap();
        for (e, a) in expected.iter().zip(&actual) {
            assert!((e - a).abs() < 1e-5);
        }
    }
}

/// 重みが 0 のエントリが省略されることのテスト
#[test]
fn test_write_skips_zero_weights() {
    let mut model = ModelBuilder::new(3, vec![FeatureTemplate::new([0])])
        .build()
        .unwrap();
    model.update(&[7], 0, 1, 1.0).unwrap();
    assert_eq!(2, export(&model).lines().count());

    model.update(&[7], 1, 0, 1.0).unwrap();
    assert_eq!("", export(&model));
}

/// 同じエントリの重みが足し合わされることのテスト
#[test]
fn test_read_weights_accumulate() {
    let mut model = ModelBuilder::new(2, vec![FeatureTemplate::new([0])])
        .build()
        .unwrap();
    model
        .read_weights("42,0,1.5\n\n42,0,0.5\n42,1,-2\n".as_bytes())
        .unwrap();
    assert_eq!(2.0, model.weights().get(42, 0));
    assert_eq!(-2.0, model.weights().get(42, 1));
    assert_eq!(1, model.weights().len());
}

/// 不正な三つ組の読み込みのテスト
#[test]
fn test_read_weights_invalid() {
    let mut model = ModelBuilder::new(2, vec![FeatureTemplate::new([0])])
        .build()
        .unwrap();

    assert!(matches!(
        model.read_weights("42,2,1.0\n".as_bytes()),
        Err(SparselinError::Configuration(_))
    ));
    for triples in ["42,0\n", "42,0,1.0,3\n", "x,0,1.0\n", "42,-1,1.0\n", "42,0,NaN\n", "42,0,inf\n"] {
        assert!(
            matches!(
                model.read_weights(triples.as_bytes()),
                Err(SparselinError::InvalidFormat(_))
            ),
            "{triples:?}"
        );
    }
}

/// 途中の行が不正な場合に重み表が変更されないことのテスト
#[test]
fn test_read_weights_invalid_later_line() {
    let mut model = ModelBuilder::new(2, vec![FeatureTemplate::new([0])])
        .build()
        .unwrap();

    assert!(matches!(
        model.read_weights("42,0,1.5\n43,1,2.0\n44,5,1.0\n".as_bytes()),
        Err(SparselinError::Configuration(_))
    ));
    assert!(model.weights().is_empty());

    assert!(matches!(
        model.read_weights("42,0,1.5\n43,1,oops\n".as_bytes()),
        Err(SparselinError::InvalidFormat(_))
    ));
    assert!(model.weights().is_empty());
    assert_eq!(0.0, model.weights().get(42, 0));

    // A valid input still loads after the failures.
    model.read_weights("42,0,1.5\n".as_bytes()).unwrap();
    assert_eq!(1.5, model.weights().get(42, 0));
}

/// チェックポイントから学習を再開できることのテスト
#[test]
fn test_checkpoint_round_trip() {
    let mut model = builder().averaging(true).regularization(2.0).build().unwrap();
    train(&mut model);

    let file = NamedTempFile::new().unwrap();
    model.write_model(File::create(file.path()).unwrap()).unwrap();
    let mut restored = Model::read_model(File::open(file.path()).unwrap()).unwrap();

    assert_eq!(model.timestep(), restored.timestep());
    assert_eq!(model.n_atoms(), restored.n_atoms());
    assert!(restored.is_averaging());
    assert_eq!(2.0, restored.regularization());
    assert!(restored.extractor().bias());
    assert_eq!(export(&model), export(&restored));

    // Training continues identically, including the averaging accumulators.
    train(&mut model);
    train(&mut restored);
    assert_eq!(model.timestep(), restored.timestep());
    assert_eq!(export(&model), export(&restored));
    for context in CONTEXTS {
        assert_eq!(
            model.score(&context, true).unwrap(),
            restored.score(&context, true).unwrap()
        );
    }
}

/// 壊れたチェックポイントの読み込みのテスト
#[test]
fn test_read_broken_checkpoint() {
    assert!(matches!(
        Model::read_model(&b"not a checkpoint"[..]),
        Err(SparselinError::InvalidState(_))
    ));
}
