/// 门禁人脸识别哨兵 (Face Sentinel)
///
/// 多路摄像头实时人脸识别门禁系统
///
/// 系统架构:
/// 1. 采集线程: 每路摄像头独立读帧 (断线自动重连)
/// 2. 识别线程: 检测 → 人脸库匹配 → 告警/出入记录 → 叠加标注
/// 3. 输出线程: 将各路最新标注帧写入输出目录
/// 4. 主线程:   操作员控制台 (标准输入命令)
///
/// 主程序入口 - 直接运行: cargo run --bin sentinel --release
use anyhow::{bail, Context, Result};
use clap::Parser;
use face_sentinel::config::BoxBinding;
use face_sentinel::renderer::stream::{FrameStream, LatestFrames};
use face_sentinel::{gen_time_string, Sentinel, SentinelConfig};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 输出线程刷新间隔
const PUBLISH_INTERVAL: Duration = Duration::from_millis(200);

/// 门禁哨兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "门禁人脸识别哨兵", long_about = None)]
struct Args {
    /// 配置文件路径 (不存在时自动生成默认配置)
    #[arg(short, long, default_value = "sentinel.json")]
    config: PathBuf,

    /// 标注帧输出目录
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// 启动时打开的摄像头, 形如 1=0 或 2=dir:/data/cam2 (可重复)
    #[arg(short, long = "box", value_parser = parse_binding)]
    boxes: Vec<BoxBinding>,

    /// 覆盖匹配距离阈值
    #[arg(long)]
    threshold: Option<f32>,

    /// 覆盖告警冷却时间(秒)
    #[arg(long)]
    cooldown: Option<u64>,

    /// 覆盖人脸分析后端 (none / http://...)
    #[arg(long)]
    detector: Option<String>,
}

fn parse_binding(s: &str) -> Result<BoxBinding, String> {
    let (id, selector) = s
        .split_once('=')
        .ok_or_else(|| format!("格式应为 <编号>=<设备>: {}", s))?;
    let box_id = id
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("无效的摄像头编号 {}: {}", id, e))?;
    Ok(BoxBinding {
        box_id,
        selector: selector.trim().to_string(),
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("face_sentinel=info,sentinel=info")),
        )
        .with_thread_names(true)
        .init();

    let args = Args::parse();

    let mut config = SentinelConfig::load(&args.config);
    if let Some(threshold) = args.threshold {
        config.recognition.distance_threshold = threshold;
    }
    if let Some(cooldown) = args.cooldown {
        config.alert.cooldown_secs = cooldown;
    }
    if let Some(detector) = args.detector {
        config.recognition.detector_backend = detector;
    }
    config.print_summary();

    let mut bindings = config.boxes.clone();
    for binding in args.boxes {
        bindings.retain(|b| b.box_id != binding.box_id);
        bindings.push(binding);
    }

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("无法创建输出目录 {}", args.output.display()))?;

    info!("🚀 门禁哨兵启动");
    let sentinel = Arc::new(Sentinel::start(config)?);

    for binding in &bindings {
        match sentinel.dispatcher.start(binding.box_id, &binding.selector) {
            Ok(()) => info!("📹 摄像头 {} ← {}", binding.box_id, binding.selector),
            Err(e) => error!("❌ 摄像头 {} 启动失败: {}", binding.box_id, e),
        }
    }

    // ========== 启动输出线程 ==========
    let running = Arc::new(AtomicBool::new(true));
    let latest = Arc::new(LatestFrames::new());
    let publisher = {
        let (sentinel, running, output) = (sentinel.clone(), running.clone(), args.output.clone());
        let latest = latest.clone();
        std::thread::Builder::new()
            .name("publisher".into())
            .spawn(move || publish_loop(&sentinel, &latest, &running, &output))
            .context("无法启动输出线程")?
    };

    // ========== 主线程: 操作员控制台 ==========
    println!("输入 help 查看可用命令");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("读取标准输入失败")?;
        match handle_command(&sentinel, &latest, &args.output, line.trim()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("❌ {}", e),
        }
    }

    running.store(false, Ordering::Relaxed);
    if publisher.join().is_err() {
        warn!("⚠️ 输出线程异常退出");
    }
    sentinel.shutdown();
    Ok(())
}

/// 执行一条控制台命令; 返回 false 表示退出
fn handle_command(
    sentinel: &Sentinel,
    latest: &LatestFrames,
    output: &Path,
    line: &str,
) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(true);
    };
    match cmd {
        "start" => {
            let box_id = parse_box(parts.next())?;
            let Some(selector) = parts.next() else {
                bail!("用法: start <编号> <设备>");
            };
            sentinel.dispatcher.start(box_id, selector)?;
            println!("✅ 摄像头 {} 已启动", box_id);
        }
        "stop" => {
            let box_id = parse_box(parts.next())?;
            sentinel.dispatcher.stop(box_id)?;
            println!("✅ 摄像头 {} 已停止", box_id);
        }
        "stopall" => {
            sentinel.dispatcher.stop_all();
            println!("✅ 全部摄像头已停止");
        }
        "reload" => {
            let identity = parts.next().unwrap_or("manual");
            if sentinel.enrollment_completed(identity) {
                println!("🔄 已请求重新加载人脸库");
            } else {
                println!("⏳ 已有待处理的重新加载请求");
            }
        }
        "status" => print_status(sentinel),
        "snap" => {
            let box_id = parse_box(parts.next())?;
            let path = output.join(format!("box{}_{}.jpg", box_id, gen_time_string("-")));
            let jpeg = snapshot(sentinel, latest, box_id)?;
            std::fs::write(&path, jpeg.as_slice())
                .with_context(|| format!("无法写入 {}", path.display()))?;
            println!("📸 已保存 {}", path.display());
        }
        "help" => {
            println!("  start <编号> <设备>   启动摄像头 (设备: 0 / dir:<目录> / http://...)");
            println!("  stop <编号>           停止摄像头");
            println!("  stopall               停止全部摄像头");
            println!("  reload [人员编号]     重新加载人脸库");
            println!("  status                查看运行状态");
            println!("  snap <编号>           保存当前标注帧");
            println!("  quit                  退出");
        }
        "quit" | "exit" => return Ok(false),
        other => bail!("未知命令: {} (输入 help 查看)", other),
    }
    Ok(true)
}

fn parse_box(arg: Option<&str>) -> Result<u32> {
    let Some(arg) = arg else {
        bail!("缺少摄像头编号");
    };
    arg.parse::<u32>()
        .with_context(|| format!("无效的摄像头编号: {}", arg))
}

/// 运行中的摄像头取输出线程最近发布的帧; 未启动的取占位帧
fn snapshot(sentinel: &Sentinel, latest: &LatestFrames, box_id: u32) -> Result<Arc<Vec<u8>>> {
    if sentinel.dispatcher.is_running(box_id) {
        return latest
            .latest(box_id)
            .with_context(|| format!("摄像头 {} 尚无可用帧", box_id));
    }
    let jpeg = sentinel
        .dispatcher
        .stream(box_id)
        .next_jpeg(Duration::from_millis(10))
        .context("无法生成占位帧")??;
    Ok(Arc::new(jpeg))
}

fn print_status(sentinel: &Sentinel) {
    let store = &sentinel.context.store;
    println!(
        "📊 人脸库: {} 人 (版本 {})",
        store.len(),
        store.snapshot().version()
    );
    let status = sentinel.dispatcher.status();
    if status.is_empty() {
        println!("   (无运行中的摄像头)");
    }
    for s in status {
        println!(
            "   摄像头 {} [{}] {:?} | 采集 {} | 处理 {} | 人脸 {} | 重连 {} | 丢帧 {} | {:.1} FPS",
            s.box_id,
            s.selector,
            s.state,
            s.frames_captured,
            s.frames_processed,
            s.faces_seen,
            s.reconnects,
            s.dropped_frames,
            s.fps
        );
    }
}

/// 将每路最新标注帧写入 `<output>/box<N>.jpg`, 并缓存供截图使用
fn publish_loop(sentinel: &Sentinel, latest: &LatestFrames, running: &AtomicBool, output: &Path) {
    let mut streams: HashMap<u32, FrameStream> = HashMap::new();
    while running.load(Ordering::Relaxed) {
        let active = sentinel.dispatcher.active_boxes();
        streams.retain(|id, stream| active.contains(id) && stream.is_live());
        latest.retain(&active);
        for box_id in active {
            let stream = streams
                .entry(box_id)
                .or_insert_with(|| sentinel.dispatcher.stream(box_id));
            match stream.next_jpeg(Duration::from_millis(10)) {
                Some(Ok(jpeg)) => {
                    if let Err(e) = write_atomic(&output.join(format!("box{}.jpg", box_id)), &jpeg) {
                        warn!("⚠️ 摄像头 {} 输出帧写入失败: {}", box_id, e);
                    }
                    latest.publish(box_id, jpeg);
                }
                Some(Err(e)) => warn!("⚠️ 摄像头 {} JPEG编码失败: {}", box_id, e),
                None => {}
            }
        }
        std::thread::sleep(PUBLISH_INTERVAL);
    }
}

/// 先写临时文件再改名, 读取方不会看到半帧
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("jpg.tmp");
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.flush()?;
    drop(file);
    std::fs::rename(&tmp, path)
}
