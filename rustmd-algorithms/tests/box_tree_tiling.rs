use rustmd_algorithms::{BoxController, MdBoxTree, NodeKind};
use rustmd_core::MdEvent;

fn event(coords: &[f64]) -> MdEvent {
    MdEvent::new(1.0, 1.0, coords.to_vec())
}

/// Children of `idx` cover its region exactly, sharing bit-identical faces.
fn assert_tiles(tree: &MdBoxTree, idx: usize, factors: &[usize]) {
    let parent = tree.node(idx).unwrap();
    let children = tree.children(idx).unwrap();
    assert_eq!(children.len(), factors.iter().product::<usize>());

    let volume: f64 = children.clone().map(|c| tree.node(c).unwrap().volume()).sum();
    approx::assert_relative_eq!(volume, parent.volume(), max_relative = 1e-12);

    for d in 0..tree.nd() {
        let mut lows: Vec<f64> = children.clone().map(|c| tree.node(c).unwrap().lo()[d]).collect();
        let mut highs: Vec<f64> = children.clone().map(|c| tree.node(c).unwrap().hi()[d]).collect();
        lows.sort_by(f64::total_cmp);
        lows.dedup();
        highs.sort_by(f64::total_cmp);
        highs.dedup();
        assert_eq!(lows.len(), factors[d]);
        assert_eq!(lows[0], parent.lo()[d]);
        assert_eq!(*highs.last().unwrap(), parent.hi()[d]);
        // every inner upper face is some sibling's lower face
        assert_eq!(&highs[..highs.len() - 1], &lows[1..]);
    }
}

#[test]
fn test_below_threshold_does_not_split() {
    let controller = BoxController::new()
        .with_split_into(3)
        .with_split_threshold(4);
    let mut tree = MdBoxTree::new(vec![0.0, 0.0], vec![3.0, 3.0], controller).unwrap();
    for i in 0..4 {
        assert!(tree.insert_event(&event(&[f64::from(i) * 0.5, 1.0])).unwrap());
    }
    assert_eq!(tree.n_boxes(), 1);
    assert!(matches!(tree.node(0).unwrap().kind(), NodeKind::Leaf(_)));
}

#[test]
fn test_threshold_plus_one_splits_once() {
    let controller = BoxController::new()
        .with_split_into_per_dim(vec![2, 3, 4])
        .with_split_threshold(4);
    let mut tree = MdBoxTree::new(vec![-1.0, 0.0, 0.1], vec![1.0, 0.3, 0.9], controller).unwrap();
    let points = [
        [-0.9, 0.01, 0.15],
        [0.5, 0.2, 0.5],
        [0.99, 0.29, 0.89],
        [0.0, 0.1, 0.3],
        [-0.2, 0.25, 0.7],
    ];
    for p in &points {
        assert!(tree.insert_event(&event(p)).unwrap());
    }
    assert_eq!(tree.n_boxes(), 1 + 24);
    assert_eq!(tree.depth(), 1);
    assert_tiles(&tree, 0, &[2, 3, 4]);
    assert_eq!(tree.leaf_event_counts().iter().sum::<usize>(), 5);
    for p in &points {
        let leaf = tree.locate(p).unwrap();
        let node = tree.node(leaf).unwrap();
        for d in 0..3 {
            assert!(node.lo()[d] <= p[d] && p[d] < node.hi()[d]);
        }
    }
}

#[test]
fn test_presplit_tiles_recursively() {
    let controller = BoxController::new()
        .with_split_into(2)
        .try_with_min_depth(3)
        .unwrap();
    let tree = MdBoxTree::new(vec![0.0, -5.0], vec![0.7, 5.0], controller).unwrap();
    assert_eq!(tree.n_leaves(), 64);
    let interior: Vec<usize> = (0..tree.n_boxes())
        .filter(|&i| !tree.node(i).unwrap().is_leaf())
        .collect();
    assert_eq!(interior.len(), 1 + 4 + 16);
    for idx in interior {
        assert_tiles(&tree, idx, &[2, 2]);
    }
}

#[test]
fn test_out_of_range_dropped_and_counted() {
    let mut tree = MdBoxTree::new(vec![0.0], vec![1.0], BoxController::default()).unwrap();
    assert!(tree.insert_event(&event(&[1.0])).unwrap());
    assert!(!tree.insert_event(&event(&[1.0 + 1e-12])).unwrap());
    assert!(!tree.insert_event(&event(&[f64::NAN])).unwrap());
    assert_eq!(tree.n_events(), 1);
    assert_eq!(tree.n_dropped(), 2);
}
