use std::io::Write;

use rustmd_algorithms::{
    ConvertToMdConfig, EnergyMode, Error, ErrorKind, QModeKind, QScaling, SplitInto, TargetFrame,
};

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "q_mode": "Q3D",
            "emode": "Indirect",
            "frame": "HKL",
            "scaling": "HKL",
            "u_proj": [1, 1, 0],
            "v_proj": [1, -1, 0],
            "w_proj": [0, 0, 1],
            "other_dimensions": ["temperature"],
            "split_into": 3,
            "split_threshold": 200,
            "min_recursion_depth": 1,
            "max_recursion_depth": 8,
            "ignore_zero_signal": false
        }}"#
    )
    .unwrap();

    let config = ConvertToMdConfig::from_file(file.path()).unwrap();
    assert_eq!(config.q_mode, QModeKind::Q3D);
    assert_eq!(config.emode, EnergyMode::Indirect);
    assert_eq!(config.frame, TargetFrame::HklFrame);
    assert_eq!(config.scaling, QScaling::HklScale);
    assert_eq!(config.u_proj, vec![1.0, 1.0, 0.0]);
    assert_eq!(config.split_into, SplitInto::Uniform(3));
    assert_eq!(config.output_dims(), 5);
    assert!(!config.ignore_zero_signal);
    let controller = config.box_controller().unwrap();
    assert_eq!(controller.min_depth, 1);
    assert_eq!(controller.max_depth, 8);
    // untouched fields keep their defaults
    assert_eq!(config.block_size, ConvertToMdConfig::default().block_size);
}

#[test]
fn test_invalid_file_contents() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"min_recursion_depth": 9, "max_recursion_depth": 2}}"#).unwrap();
    let err = ConvertToMdConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, Error::RecursionDepth { min: 9, max: 2 }));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "not json").unwrap();
    let err = ConvertToMdConfig::from_file(file.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConvertToMdConfig::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}
