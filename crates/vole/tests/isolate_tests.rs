// Node isolation tests: minimal model synthesis and isolated execution

use std::sync::Arc;

use vole::onnx::{OnnxDim, OnnxModel, OnnxNode, OnnxOpset, OnnxTensor, OnnxValueInfo};
use vole::prelude::*;
use vole::{ElementType, EngineTensor};
use vole_cpu::ops::{self, BinaryOp, UnaryOp};
use vole_cpu::CpuEngine;

fn cpu() -> Arc<dyn Engine> {
    Arc::new(CpuEngine::new())
}

fn floats(dims: &[usize], values: Vec<f32>) -> HostArray {
    HostArray::from_shape_vec(dims, values).unwrap()
}

/// h = x * w (w is a constant), y = h + b, z = Sigmoid(y)
fn mlp_model() -> OnnxModel {
    let mut model = OnnxModel::new("mlp");
    model.opset_imports.push(OnnxOpset {
        domain: "ai.vole.test".into(),
        version: 3,
    });
    let g = &mut model.graph;
    g.inputs.push(OnnxValueInfo::tensor("x", ElementType::Float, &[-1, 3]));
    g.inputs.push(OnnxValueInfo::tensor("b", ElementType::Float, &[3]));
    g.outputs.push(OnnxValueInfo::tensor("z", ElementType::Float, &[-1, 3]));
    g.initializers.push(OnnxTensor {
        float_data: vec![1.0, -2.0, 0.5],
        ..OnnxTensor::new("w", ElementType::Float, vec![3])
    });
    g.nodes.push(OnnxNode::new("Mul", "mul_0", &["x", "w"], &["h"]));
    g.nodes.push(OnnxNode::new("Add", "add_0", &["h", "b"], &["y"]));
    g.nodes.push(OnnxNode::new("Sigmoid", "sig_0", &["y"], &["z"]));
    model
}

#[test]
fn test_isolated_model_shape() {
    let model = mlp_model();
    let node = model.graph.node("add_0").unwrap();
    let h = floats(&[2, 3], vec![0.0; 6]);
    let b = floats(&[3], vec![1.0, 2.0, 3.0]);
    let minimal = isolate_node(
        &model,
        node,
        &[("h".to_string(), h), ("b".to_string(), b)],
    )
    .unwrap();

    assert_eq!(minimal.graph.nodes, vec![node.clone()]);
    assert_eq!(minimal.opset_imports, model.opset_imports);
    assert!(minimal.graph.initializers.is_empty());

    // declarations come from the data, not from the source graph
    assert_eq!(
        minimal.graph.inputs,
        vec![
            OnnxValueInfo::tensor("h", ElementType::Float, &[2, 3]),
            OnnxValueInfo::tensor("b", ElementType::Float, &[3]),
        ]
    );
    assert_eq!(minimal.graph.inputs[0].shape.as_ref().unwrap()[0], OnnxDim::Value(2));
    assert_eq!(minimal.graph.outputs, vec![OnnxValueInfo::untyped("y")]);
}

#[test]
fn test_isolation_copies_referenced_initializers() {
    let model = mlp_model();
    let node = model.graph.node("mul_0").unwrap();
    let x = floats(&[1, 3], vec![1.0, 1.0, 1.0]);
    let minimal = isolate_node(&model, node, &[("x".to_string(), x)]).unwrap();

    assert_eq!(minimal.graph.inputs.len(), 1);
    assert_eq!(minimal.graph.initializers.len(), 1);
    assert_eq!(minimal.graph.initializers[0].name, "w");

    let err = isolate_node(&model, model.graph.node("add_0").unwrap(), &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let stray = [("q".to_string(), floats(&[1], vec![0.0]))];
    assert!(matches!(
        isolate_node(&model, node, &stray),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_isolated_node_matches_reference() {
    let model = mlp_model();
    let h = floats(&[2, 3], vec![-1.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
    let b = floats(&[3], vec![0.5, 0.5, 0.5]);

    let out = run_node(
        cpu(),
        &model,
        "add_0",
        Inputs::list([h.clone(), b.clone()]),
        &RunOptions::default(),
    )
    .unwrap();
    let expected = ops::binary(BinaryOp::Add, &h, &b).unwrap();
    assert_eq!(out.names().collect::<Vec<_>>(), vec!["y"]);
    assert_eq!(out["y"], expected);

    let y = out["y"].clone();
    let inputs = Inputs::map([("y", y.clone())]);
    let out = run_node(cpu(), &model, "sig_0", inputs, &RunOptions::default()).unwrap();
    assert_eq!(out["z"], ops::unary(UnaryOp::Sigmoid, &y).unwrap());
}

#[test]
fn test_isolated_node_with_initializer_input() {
    let model = mlp_model();
    let x = floats(&[1, 3], vec![2.0, 2.0, 2.0]);

    // only x is passed; w comes from the source model
    let out = run_node(cpu(), &model, "mul_0", Inputs::list([x.clone()]), &RunOptions::default())
        .unwrap();
    assert_eq!(out["h"], floats(&[1, 3], vec![2.0, -4.0, 1.0]));

    // passing every input overrides the initializer
    let w = floats(&[3], vec![3.0, 3.0, 3.0]);
    let out = run_node(cpu(), &model, "mul_0", Inputs::list([x, w]), &RunOptions::default())
        .unwrap();
    assert_eq!(out["h"], floats(&[1, 3], vec![6.0, 6.0, 6.0]));
}

#[test]
fn test_isolated_node_file_argument() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("h.pb");
    let h = EngineTensor::from_vec("h", vec![2, 3], (0..6).map(|v| v as f32).collect()).unwrap();
    OnnxTensor::from_engine_tensor(&h).save(&path).unwrap();
    let descriptor = format!("{}::1:2", path.display());

    let model = mlp_model();
    let b = floats(&[3], vec![1.0, 1.0, 1.0]);
    let opts = RunOptions::new().with_file_arg(0).with_save_file_arg(true);
    let out = run_node(
        cpu(),
        &model,
        "add_0",
        Inputs::list([InputValue::from(descriptor.as_str()), b.into()]),
        &opts,
    )
    .unwrap();
    assert_eq!(out["y"], floats(&[1, 3], vec![4.0, 5.0, 6.0]));
    assert!(dir.path().join("h.1_2.resolved.pb").exists());

    let missing = format!("{}::mnist", path.display());
    let err = run_node(
        cpu(),
        &model,
        "add_0",
        Inputs::list([InputValue::from(missing.as_str()), floats(&[3], vec![0.0; 3]).into()]),
        &RunOptions::new().with_file_arg(0),
    )
    .unwrap_err();
    assert!(matches!(err, Error::FileArgUnresolved(_)));
}

#[test]
fn test_run_node_errors() {
    let model = mlp_model();
    let empty = Inputs::list(Vec::<HostArray>::new());
    let err = run_node(cpu(), &model, "nope", empty, &RunOptions::default()).unwrap_err();
    assert!(matches!(err, Error::NodeNotFound(name) if name == "nope"));

    let err = run_node(
        cpu(),
        &model,
        "add_0",
        Inputs::list([floats(&[3], vec![0.0; 3])]),
        &RunOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_run_bare_node_definition() {
    let node = OnnxNode::new("Relu", "", &["x"], &["y"]);
    let x = HostArray::from_shape_vec(&[4], vec![-2i32, -1, 0, 5]).unwrap();
    let out = run_node_def(cpu(), &node, Inputs::list([x]), &RunOptions::default()).unwrap();
    assert_eq!(out["y"], HostArray::from_shape_vec(&[4], vec![0i32, 0, 0, 5]).unwrap());

    let node = OnnxNode::new("Sub", "sub", &["a", "a"], &["d"]);
    let a = floats(&[2], vec![1.5, 2.5]);
    let out = run_node_def(cpu(), &node, Inputs::list([a]), &RunOptions::default()).unwrap();
    assert_eq!(out["d"], floats(&[2], vec![0.0, 0.0]));
}
