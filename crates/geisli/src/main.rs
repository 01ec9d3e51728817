//! Binary entry point.
//!
//! `geisli` — list the available accelerator platforms and exit.
//! `geisli <platform> [model.ply ...]` — trace the demo scene built from
//! the given PLY models (none is a valid, sky-only scene) on the chosen
//! platform.

use std::process::ExitCode;

use winit::event_loop::EventLoop;

use geisli::render::GpuContext;
use geisli::render::tracer::DEFAULT_RAY_COUNT;
use geisli::scene::SceneData;
use geisli::window::{App, HEIGHT, WIDTH};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let adapters = GpuContext::list_adapters();
    if args.is_empty() {
        for (i, adapter) in adapters.iter().enumerate() {
            println!("Platform {i}: {adapter}");
        }
        println!("Rerun with a platform index argument.");
        return ExitCode::SUCCESS;
    }

    let adapter_index: usize = match args[0].parse() {
        Ok(index) => index,
        Err(_) => {
            eprintln!("Invalid platform index!");
            return ExitCode::FAILURE;
        }
    };
    if adapter_index >= adapters.len() {
        eprintln!("Invalid platform index!");
        return ExitCode::FAILURE;
    }

    // Models come up before any device resource does; a parse failure
    // aborts the run outright.
    let scene = match SceneData::demo(WIDTH, HEIGHT, DEFAULT_RAY_COUNT, &args[1..]) {
        Ok(scene) => scene,
        Err(err) => {
            eprintln!("Failed to load model: {err}");
            return ExitCode::FAILURE;
        }
    };

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            eprintln!("Cannot create event loop: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut app = App::new(adapter_index, scene);
    if event_loop.run_app(&mut app).is_err() || app.failed() {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
