//! rtas CLI - builds the Cornell box acceleration structure with a selectable back-end.

mod scene;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rtas::api::{
    ApiRevision, BuildFlags, BuildOpDesc, BuildOutput, BuildQuality, BuilderMode, ContextHandle, DeviceBuffer,
    DeviceHandle, DriverHandle, GeometryInfo, RaytracingFlags, RtasFormat, RTAS_EXTENSION_NAME,
};
use rtas::config::Config;
use rtas::driver::HostDriver;
use rtas::BuilderContext;

const DRIVER: DriverHandle = DriverHandle(1);
const DEVICE: DeviceHandle = DeviceHandle(1);
const CONTEXT: ContextHandle = ContextHandle(1);

struct Options {
    mode: BuilderMode,
    instance: bool,
    device_memory: bool,
    config: Option<PathBuf>,
    log_level: &'static str,
}

fn main() {
    let opts = match parse_args(std::env::args().skip(1)) {
        Ok(Some(opts)) => opts,
        Ok(None) => {
            print_help();
            return;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            print_help();
            std::process::exit(1);
        }
    };

    init_logging(opts.log_level);

    if let Err(e) = run(&opts) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Options>> {
    let mut opts = Options {
        mode: BuilderMode::Internal,
        instance: false,
        device_memory: false,
        config: None,
        log_level: "info",
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--internal-rtas-builder" => opts.mode = BuilderMode::Internal,
            "--level-zero-rtas-builder" => opts.mode = BuilderMode::VendorDriver,
            "--instance" => opts.instance = true,
            "--device-memory" => opts.device_memory = true,
            "--config" => {
                let path = args.next().context("--config needs a file argument")?;
                opts.config = Some(PathBuf::from(path));
            }
            "-v" | "--verbose" => opts.log_level = "debug",
            "-q" | "--quiet" => opts.log_level = "warn",
            "-h" | "--help" => return Ok(None),
            "-V" | "--version" => {
                println!("{}", version());
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(Some(opts))
}

fn print_help() {
    println!(
        "rtas-cli - build the Cornell box acceleration structure

Usage: rtas-cli [options]

Options:
  --internal-rtas-builder     use the in-process builder (default)
  --level-zero-rtas-builder   use the driver's builder, falling back to the
                              in-process one if the driver has none
  --instance                  also build a top-level structure instancing the box
  --device-memory             build into host memory, then copy to device memory
  --config <file>             JSON settings file
  -v, --verbose               debug output
  -q, --quiet                 warnings only
  -h, --help                  this text
  -V, --version               version and build date

Environment:
  RUST_LOG                         log filter, overrides -v/-q
  EMBREE_DISABLE_DEVICEID_CHECK=1  accept any Intel device as format V1"
    );
}

fn version() -> String {
    let date = option_env!("RTAS_BUILD_DATE").unwrap_or("unknown");
    let time = option_env!("RTAS_BUILD_TIME").unwrap_or("unknown");
    format!("rtas-cli {} (built {date} {time})", env!("CARGO_PKG_VERSION"))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run(opts: &Options) -> Result<()> {
    let config = match &opts.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("cannot read {}", path.display()))?
            .with_env_overrides(),
        None => Config::from_env(),
    };

    let driver = Arc::new(HostDriver::new());
    let ctx = BuilderContext::with_config(driver.loader(), config);
    ctx.init().context("driver not initialized")?;

    let module = ctx.device_module_properties(DEVICE)?;
    if !module.raytracing_flags.contains(RaytracingFlags::RAY_QUERY) {
        bail!("device does not support ray tracing");
    }

    let extensions = ctx.driver_extension_properties(DRIVER)?;
    if !extensions.iter().any(|e| e.name == RTAS_EXTENSION_NAME) {
        bail!("{RTAS_EXTENSION_NAME} extension not available");
    }

    select_builder(&ctx, opts.mode)?;

    let rtas_props = ctx.rtas_device_properties(DEVICE)?;
    println!("RTAS format = {:?}", rtas_props.format);
    println!("RTAS alignment = {}", rtas_props.buffer_alignment);

    let blas = build_rtas(&ctx, rtas_props.format, vec![scene::cornell_box()], opts.device_memory)?;
    report("bottom level", &blas.1);

    let mut buffers = vec![blas.0.clone()];
    if opts.instance {
        let tlas = build_rtas(
            &ctx,
            rtas_props.format,
            vec![scene::cornell_box_instance(blas.0.address())],
            opts.device_memory,
        )?;
        report("top level", &tlas.1);
        buffers.push(tlas.0);
    }

    for buffer in &buffers {
        ctx.mem_free(CONTEXT, buffer)?;
    }
    Ok(())
}

/// Select `mode`, dropping back to the internal builder if the driver has none.
fn select_builder(ctx: &BuilderContext, mode: BuilderMode) -> Result<()> {
    match ctx.init_builder(ApiRevision::Ext, DRIVER, mode) {
        Err(e) if e.is_dependency_unavailable() => {
            warn!("cannot load {RTAS_EXTENSION_NAME} extension ({e}), using internal builder");
            ctx.init_builder(ApiRevision::Ext, DRIVER, BuilderMode::Internal)
                .context("cannot initialize internal builder")?;
        }
        other => other.context("cannot initialize RTAS builder")?,
    }
    match ctx.builder_mode() {
        Some(BuilderMode::Internal) => info!("using internal RTAS builder ({RTAS_EXTENSION_NAME})"),
        _ => info!("using Level Zero RTAS builder ({RTAS_EXTENSION_NAME})"),
    }
    Ok(())
}

/// Build `geometries` on a parallel operation joined from every pool thread.
fn build_rtas(
    ctx: &BuilderContext,
    format: RtasFormat,
    geometries: Vec<GeometryInfo>,
    device_memory: bool,
) -> Result<(DeviceBuffer, BuildOutput)> {
    let builder = ctx.create_builder(DRIVER)?;
    let pop = ctx.parallel_operation_create(DRIVER)?;

    let op = BuildOpDesc {
        format,
        quality: BuildQuality::Medium,
        flags: BuildFlags::empty(),
        geometries: geometries.into_iter().map(Some).collect(),
    };
    let props = ctx.build_properties(builder, &op)?;
    let alignment = ctx.rtas_device_properties(DEVICE)?.buffer_alignment as usize;

    let scratch = match props.scratch_buffer_size {
        0 => None,
        n => Some(ctx.mem_alloc_shared(CONTEXT, DEVICE, n, 64)?),
    };
    let accel_bytes = props.rtas_buffer_size_max;
    let host = ctx.mem_alloc_shared(CONTEXT, DEVICE, accel_bytes, alignment)?;

    let status = ctx.build(builder, &op, scratch.as_ref(), &host, Some(pop))?;
    if !status.is_deferred() {
        bail!("build did not defer to the parallel operation");
    }

    let concurrency = ctx.parallel_operation_properties(pop)?.max_concurrency;
    let results: Vec<_> = (0..concurrency)
        .into_par_iter()
        .map(|_| ctx.parallel_operation_join(pop))
        .collect();
    let mut output = None;
    for r in results {
        output = Some(r.context("parallel build failed")?);
    }
    let output = output.context("no thread joined the build")?;

    ctx.parallel_operation_destroy(pop)?;
    ctx.destroy_builder(builder)?;
    if let Some(scratch) = &scratch {
        ctx.mem_free(CONTEXT, scratch)?;
    }

    if !device_memory {
        return Ok((host, output));
    }

    let device = ctx.mem_alloc_device(CONTEXT, DEVICE, accel_bytes, alignment)?;
    let queue = ctx.command_queue_create(CONTEXT, DEVICE)?;
    let list = ctx.command_list_create(CONTEXT, DEVICE)?;
    ctx.command_list_append_copy(list, &device, &host, accel_bytes)?;
    ctx.command_list_close(list)?;
    ctx.command_queue_execute_command_lists(queue, &[list])?;
    ctx.command_list_destroy(list)?;
    ctx.mem_free(CONTEXT, &host)?;
    Ok((device, output))
}

fn report(level: &str, out: &BuildOutput) {
    println!(
        "{level}: {} bytes, bounds [{:.1} {:.1} {:.1}] - [{:.1} {:.1} {:.1}]",
        out.rtas_bytes,
        out.bounds.min.x,
        out.bounds.min.y,
        out.bounds.min.z,
        out.bounds.max.x,
        out.bounds.max.y,
        out.bounds.max.z,
    );
}
