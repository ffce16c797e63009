//! Headless render-graph demo
//!
//! Assembles a three-stage CPU pipeline (generate, blur, reduce), compiles
//! it, runs a couple of hundred frames and prints the profiler, aliasing and
//! budget reports. No window or GPU is required; the point is to show the
//! graph lifecycle and the resource subsystem end to end.
//!
//! Usage: `graph_demo [config.toml]`

use graph_engine::prelude::*;

const MIB: u64 = 1024 * 1024;

const GENERATE_TYPE: u32 = 100;
const BLUR_TYPE: u32 = 101;
const REDUCE_TYPE: u32 = 102;

/// Writes a procedurally filled buffer each compile and a frame token each
/// execute
struct GenerateNode {
    bytes: u64,
}

impl Node for GenerateNode {
    fn compile(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let seed = ctx.param_u32_or("seed", 7) as u8;
        let data = vec![seed; self.bytes as usize];
        ctx.publish_with(
            0,
            SlotValue::HostBytes(data),
            PublishSpec::device(self.bytes, ResourceLifetime::Transient),
        )?;
        ctx.publish(1, SlotValue::U32(0))?;
        ctx.log().info(format!("generated {} bytes", self.bytes));
        Ok(())
    }

    fn execute(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        ctx.publish(1, SlotValue::U32(ctx.frame_number() as u32))?;
        Ok(())
    }
}

/// Box-filters its input into a same-sized output buffer
struct BlurNode;

impl Node for BlurNode {
    fn compile(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let input = ctx.input_host_bytes(0)?;
        let mut output = input.to_vec();
        for i in 1..output.len().saturating_sub(1) {
            output[i] = ((input[i - 1] as u16 + input[i] as u16 + input[i + 1] as u16) / 3) as u8;
        }
        let bytes = output.len() as u64;
        ctx.publish_with(
            0,
            SlotValue::HostBytes(output),
            PublishSpec::device(bytes, ResourceLifetime::Transient),
        )?;
        Ok(())
    }

    fn execute(&mut self, _ctx: &mut NodeContext) -> NodeResult<()> {
        Ok(())
    }
}

/// Folds its input into a checksum published as a control value
struct ReduceNode;

impl Node for ReduceNode {
    fn execute(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let input = ctx.input_host_bytes(0)?;
        let sum: u64 = input.iter().map(|&b| b as u64).sum();
        ctx.publish(0, SlotValue::U64(sum))?;
        Ok(())
    }
}

fn build_registry() -> Result<NodeTypeRegistry, GraphError> {
    let mut registry = NodeTypeRegistry::new();
    registry.register(
        NodeTypeBuilder::new(GENERATE_TYPE, "generate")
            .output(SlotDesc::new("buffer", SlotDataType::HostBytes))
            .output(SlotDesc::new("frame_token", SlotDataType::U32))
            .build(Box::new(|| Box::new(GenerateNode { bytes: 8 * MIB }))),
    )?;
    registry.register(
        NodeTypeBuilder::new(BLUR_TYPE, "blur")
            .input(SlotDesc::new("buffer", SlotDataType::HostBytes).dependency())
            .input(SlotDesc::new("frame_token", SlotDataType::U32).optional())
            .output(SlotDesc::new("buffer", SlotDataType::HostBytes))
            .build(Box::new(|| Box::new(BlurNode))),
    )?;
    registry.register(
        NodeTypeBuilder::new(REDUCE_TYPE, "reduce")
            .input(SlotDesc::new("buffer", SlotDataType::HostBytes))
            .output(SlotDesc::new("checksum", SlotDataType::U64))
            .build(Box::new(|| Box::new(ReduceNode))),
    )?;
    Ok(registry)
}

fn assemble(graph: &mut RenderGraph, registry: &NodeTypeRegistry) -> Result<(), GraphError> {
    let generate = graph.add_node(registry, GENERATE_TYPE, "generate")?;
    let blur = graph.add_node(registry, BLUR_TYPE, "blur")?;
    let reduce = graph.add_node(registry, REDUCE_TYPE, "reduce")?;
    graph.connect(generate, 0, blur, 0)?;
    graph.connect(generate, 1, blur, 1)?;
    graph.connect(blur, 0, reduce, 0)?;
    graph.set_parameter(generate, "seed", ParameterValue::UInt(42));
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    graph_engine::foundation::logging::init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };
    let frames = 240u64;

    let registry = build_registry()?;
    let mut graph = RenderGraph::with_config(&config);
    assemble(&mut graph, &registry)?;

    graph.compile()?;
    log::info!("compiled, executing {frames} frames");
    for frame in 0..frames {
        graph.execute(frame)?;
    }

    let last = frames - 1;
    println!("{}", graph.profiler().export_text(last));
    println!(
        "rolling average: {:.1} fps over {} frames",
        graph.profiler().average_fps(),
        graph.profiler().history_len()
    );

    let aliasing = graph.aliasing_stats();
    println!(
        "aliasing: {}/{} attempts succeeded, {} MiB saved ({:.1}% of allocations)",
        aliasing.successes,
        aliasing.attempts,
        aliasing.total_bytes_saved / MIB,
        aliasing.savings_percentage()
    );

    let budget = graph.budget_manager();
    let device = budget.borrow().usage(&BudgetResourceType::DeviceMemory);
    println!(
        "device budget: {} MiB live, {} MiB peak across {} allocations",
        device.current_bytes / MIB,
        device.peak_bytes / MIB,
        device.allocation_count
    );

    if let Some(published) = graph
        .output_key("reduce", 0)
        .and_then(|key| graph.published(key))
    {
        println!("final checksum output: {:?}", published.value);
    }

    let extracted = graph.cleanup();
    println!("extracted {} buffered log entries on teardown", extracted.len());
    Ok(())
}
