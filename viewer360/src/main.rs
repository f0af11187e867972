//! Interactive 360 video viewer: plays an equirectangular stream onto a
//! cube-mapped skybox, view controlled by mouse drag.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use platform_winit::{
    create_window, ControlFlow, DragTracker, ElementState, Event, KeyCode, PhysicalKey,
    RefreshClock, WindowEvent,
};
use render_skybox::{
    cubemap_edge, FrameContext, RenderError, SkyboxRenderer,
};
use video_source::{ColorMatrix, PlaybackState, SyntheticSource, TestPattern, VideoSource};
use view_camera::{PitchRange, ViewCamera};

const WINDOW_TITLE: &str = "viewer360";
const DEFAULT_FRAME_WIDTH: u32 = 1536;
const DEFAULT_FRAME_HEIGHT: u32 = 768;
const DEFAULT_FPS: f64 = 30.0;

const EXIT_USAGE: i32 = 2;
const EXIT_SOURCE: i32 = 10;
const EXIT_WINDOW: i32 = 11;
const EXIT_RENDERER: i32 = 12;
const EXIT_EVENT_LOOP: i32 = 13;

const FACE_NAMES: [&str; 6] = ["pos_x", "neg_x", "pos_y", "neg_y", "pos_z", "neg_z"];

struct CliArgs {
    frame_width: u32,
    frame_height: u32,
    fps: f64,
    pattern: TestPattern,
    matrix: ColorMatrix,
    pitch_limit: Option<f32>,
    duration_ms: Option<u64>,
    dump_cubemap: Option<PathBuf>,
}

enum ArgParseError {
    Help,
    Message(String),
}

struct ExitError {
    code: i32,
    message: String,
}

impl ExitError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn main() {
    env_logger::init();
    let args = match parse_args() {
        Ok(args) => args,
        Err(ArgParseError::Help) => {
            print_usage();
            return;
        }
        Err(ArgParseError::Message(message)) => {
            eprintln!("{}", message);
            print_usage();
            std::process::exit(EXIT_USAGE);
        }
    };
    if let Err(err) = run(args) {
        eprintln!("{}", err.message);
        std::process::exit(err.code);
    }
}

fn run(args: CliArgs) -> Result<(), ExitError> {
    let mut source = SyntheticSource::new(
        args.frame_width,
        args.frame_height,
        args.fps,
        args.pattern,
        args.matrix,
    )
    .map_err(|err| ExitError::new(EXIT_SOURCE, format!("video source setup failed: {}", err)))?;
    if let Some(duration_ms) = args.duration_ms {
        source = source.with_duration_ms(duration_ms);
    }

    // Window sized to one cube face, keeping the frame's aspect ratio.
    let window_width = cubemap_edge(args.frame_width).max(64);
    let aspect = args.frame_width as f32 / args.frame_height as f32;
    let window_height = ((window_width as f32 / aspect) as u32).max(64);
    let (event_loop, window) = create_window(
        &format!(
            "{} ({}x{})",
            WINDOW_TITLE, args.frame_width, args.frame_height
        ),
        window_width,
        window_height,
    )
    .map_err(|err| ExitError::new(EXIT_WINDOW, format!("window setup failed: {}", err)))?;

    let mut renderer = SkyboxRenderer::new(&window, args.frame_width, args.frame_height, args.matrix)
        .map_err(|err| ExitError::new(EXIT_RENDERER, format!("renderer setup failed: {}", err)))?;
    log::info!(
        "cubemap edge {} for {}x{} frames",
        renderer.cubemap_edge(),
        args.frame_width,
        args.frame_height
    );

    let pitch_range = match args.pitch_limit {
        Some(limit) => PitchRange::Clamped(limit),
        None => PitchRange::Free,
    };
    let mut camera = ViewCamera::new(pitch_range);
    let mut drag = DragTracker::new();
    let clock = RefreshClock::start();
    let mut dump_dir = args.dump_cubemap;
    let mut last_state = PlaybackState::Playing;

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);
            match event {
                Event::WindowEvent { event, window_id } if window_id == renderer.window_id() => {
                    match event {
                        WindowEvent::CloseRequested => elwt.exit(),
                        WindowEvent::Resized(size) => renderer.resize(size),
                        WindowEvent::ScaleFactorChanged { .. } => {
                            renderer.resize(renderer.window_inner_size());
                        }
                        WindowEvent::KeyboardInput { event, .. } => {
                            if let PhysicalKey::Code(KeyCode::Space) = event.physical_key {
                                if event.state == ElementState::Pressed && !event.repeat {
                                    let tick = clock.tick();
                                    let paused = !source.is_paused();
                                    source.set_paused(paused, tick.elapsed_ms);
                                    log::info!(
                                        "playback {}",
                                        if paused { "paused" } else { "resumed" }
                                    );
                                }
                            }
                        }
                        WindowEvent::MouseInput { state, button, .. } => {
                            drag.on_mouse_input(state, button);
                        }
                        WindowEvent::CursorMoved { position, .. } => {
                            let scale = renderer.window().scale_factor();
                            if let Some(delta) = drag.on_cursor_moved(position, scale) {
                                camera.apply_drag(delta.dx, delta.dy);
                            }
                        }
                        WindowEvent::RedrawRequested => {
                            // One tick: fetch at most one decoded frame; if
                            // none is due, skip the tick entirely.
                            let tick = clock.tick();
                            let state = source.playback_state(tick.elapsed_ms);
                            if state != last_state {
                                log::info!("playback state: {:?}", state);
                                last_state = state;
                            }
                            if !source.has_frame_for(tick.elapsed_ms) {
                                return;
                            }
                            let Some(frame) = source.copy_frame_for(tick.elapsed_ms) else {
                                return;
                            };
                            if let Err(err) = renderer.upload_frame(&frame.as_view()) {
                                log::warn!("frame upload failed: {}", err);
                                return;
                            }
                            let rotation = camera.rotation();
                            let ctx = FrameContext {
                                pitch: rotation.pitch,
                                yaw: rotation.yaw,
                            };
                            match renderer.render(&ctx) {
                                Ok(()) => {
                                    if let Some(dir) = dump_dir.take() {
                                        match dump_cubemap(&renderer, &dir) {
                                            Ok(()) => log::info!(
                                                "cubemap faces written to {}",
                                                dir.display()
                                            ),
                                            Err(message) => {
                                                log::warn!("cubemap dump failed: {}", message)
                                            }
                                        }
                                    }
                                }
                                Err(RenderError::Lost | RenderError::Outdated) => {
                                    renderer.resize(renderer.size());
                                }
                                Err(RenderError::OutOfMemory) => {
                                    log::error!("render error: out of memory");
                                    elwt.exit();
                                }
                                Err(err) => log::warn!("render error: {}", err),
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => renderer.request_redraw(),
                _ => {}
            }
        })
        .map_err(|err| {
            ExitError::new(
                EXIT_EVENT_LOOP,
                format!("event loop exited with error: {}", err),
            )
        })
}

fn dump_cubemap(renderer: &SkyboxRenderer<'_>, dir: &Path) -> Result<(), String> {
    fs::create_dir_all(dir).map_err(|err| format!("create {}: {}", dir.display(), err))?;
    let faces = renderer
        .read_cubemap_faces()
        .map_err(|err| err.to_string())?;
    for (name, face) in FACE_NAMES.iter().zip(&faces.faces) {
        let path = dir.join(format!("{}.png", name));
        write_png(&path, faces.edge, face)?;
    }
    Ok(())
}

fn write_png(path: &Path, edge: u32, rgba: &[u8]) -> Result<(), String> {
    let file = fs::File::create(path).map_err(|err| format!("create {}: {}", path.display(), err))?;
    let mut encoder = png::Encoder::new(io::BufWriter::new(file), edge, edge);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder
        .write_header()
        .map_err(|err| format!("write {}: {}", path.display(), err))?;
    writer
        .write_image_data(rgba)
        .map_err(|err| format!("write {}: {}", path.display(), err))?;
    Ok(())
}

fn parse_args() -> Result<CliArgs, ArgParseError> {
    let mut args = CliArgs {
        frame_width: DEFAULT_FRAME_WIDTH,
        frame_height: DEFAULT_FRAME_HEIGHT,
        fps: DEFAULT_FPS,
        pattern: TestPattern::Checker,
        matrix: ColorMatrix::Bt601,
        pitch_limit: None,
        duration_ms: None,
        dump_cubemap: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Err(ArgParseError::Help),
            "--size" => {
                let value = expect_value(&mut iter, "--size")?;
                let (width, height) = value
                    .split_once('x')
                    .ok_or_else(|| {
                        ArgParseError::Message(format!("--size expects WxH, got {}", value))
                    })?;
                args.frame_width = parse_number(width, "--size width")?;
                args.frame_height = parse_number(height, "--size height")?;
                if args.frame_width == 0 || args.frame_height == 0 {
                    return Err(ArgParseError::Message("--size must be non-zero".into()));
                }
            }
            "--fps" => {
                let value = expect_value(&mut iter, "--fps")?;
                args.fps = value.parse::<f64>().map_err(|_| {
                    ArgParseError::Message(format!("--fps expects a number, got {}", value))
                })?;
                if !(args.fps > 0.0) {
                    return Err(ArgParseError::Message("--fps must be positive".into()));
                }
            }
            "--pattern" => {
                let value = expect_value(&mut iter, "--pattern")?;
                args.pattern = match value.as_str() {
                    "checker" => TestPattern::Checker,
                    "gradient" => TestPattern::Gradient,
                    other => {
                        return Err(ArgParseError::Message(format!(
                            "unknown pattern: {} (expected checker or gradient)",
                            other
                        )))
                    }
                };
            }
            "--matrix" => {
                let value = expect_value(&mut iter, "--matrix")?;
                args.matrix = match value.as_str() {
                    "601" => ColorMatrix::Bt601,
                    "709" => ColorMatrix::Bt709,
                    other => {
                        return Err(ArgParseError::Message(format!(
                            "unknown color matrix: {} (expected 601 or 709)",
                            other
                        )))
                    }
                };
            }
            "--pitch-limit" => {
                let value = expect_value(&mut iter, "--pitch-limit")?;
                let limit = value.parse::<f32>().map_err(|_| {
                    ArgParseError::Message(format!(
                        "--pitch-limit expects radians, got {}",
                        value
                    ))
                })?;
                if !(limit > 0.0) {
                    return Err(ArgParseError::Message(
                        "--pitch-limit must be positive".into(),
                    ));
                }
                args.pitch_limit = Some(limit);
            }
            "--duration" => {
                let value = expect_value(&mut iter, "--duration")?;
                args.duration_ms = Some(parse_number(&value, "--duration")? as u64);
            }
            "--dump-cubemap" => {
                let value = expect_value(&mut iter, "--dump-cubemap")?;
                args.dump_cubemap = Some(PathBuf::from(value));
            }
            other => {
                return Err(ArgParseError::Message(format!(
                    "unknown argument: {}",
                    other
                )))
            }
        }
    }
    Ok(args)
}

fn expect_value(
    iter: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<String, ArgParseError> {
    iter.next()
        .ok_or_else(|| ArgParseError::Message(format!("{} expects a value", flag)))
}

fn parse_number(value: &str, what: &str) -> Result<u32, ArgParseError> {
    value
        .parse::<u32>()
        .map_err(|_| ArgParseError::Message(format!("{} expects a number, got {}", what, value)))
}

fn print_usage() {
    println!("usage: viewer360 [options]");
    println!();
    println!("  --size WxH           synthetic frame size (default {}x{})", DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT);
    println!("  --fps N              synthetic frame rate (default {})", DEFAULT_FPS);
    println!("  --pattern NAME       checker or gradient (default checker)");
    println!("  --matrix NAME        YCbCr matrix, 601 or 709 (default 601)");
    println!("  --pitch-limit RAD    clamp pitch instead of free-look (try 1.54)");
    println!("  --duration MS        end the synthetic stream after MS milliseconds");
    println!("  --dump-cubemap DIR   write the six cubemap faces as PNGs after the first frame");
    println!();
    println!("drag with the left mouse button to look around; space pauses");
}
