use std::env;
use std::ffi::{c_char, c_void, CStr, CString};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::ptr;
use v2ray::ffi::V2RayLogSink;
use v2ray::{
    FreeString, GetConfigTemplate, GetV2RayVersion, StartV2RayWithConfig, StopV2Ray,
    TestV2RayConfigFile, V2RaySetBreadcrumbMask, V2RaySetLogSink,
};

const USAGE: &str = "usage: standalone <run|test> --config <path> [--log-level <level>]\n       standalone <template|version>";

fn main() -> anyhow::Result<()> {
    let settings = Settings::parse()?;
    install_log_sink(&settings.log_level)?;
    V2RaySetBreadcrumbMask(u32::MAX);

    match settings.command {
        Command::Version => println!("{}", take(GetV2RayVersion())),
        Command::Template => println!("{}", take(GetConfigTemplate())),
        Command::Test(path) => {
            let path = c_path(&path)?;
            let reply = take(unsafe { TestV2RayConfigFile(path.as_ptr()) });
            println!("{reply}");
            if reply != "Configuration file is valid" {
                anyhow::bail!("configuration rejected");
            }
        }
        Command::Run(path) => run(&path)?,
    }
    Ok(())
}

fn run(path: &Path) -> anyhow::Result<()> {
    let path = c_path(path)?;
    let reply = take(unsafe { StartV2RayWithConfig(path.as_ptr()) });
    eprintln!("[standalone] {reply}");
    if reply != "V2Ray started successfully" {
        anyhow::bail!("engine did not start");
    }

    println!("[standalone] engine running. Press Enter to stop.");
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    eprintln!("[standalone] {}", take(StopV2Ray()));
    Ok(())
}

/// Copies a library reply and releases it.
fn take(value: *mut c_char) -> String {
    if value.is_null() {
        return String::new();
    }
    let text = unsafe { CStr::from_ptr(value) }
        .to_string_lossy()
        .into_owned();
    unsafe { FreeString(value) };
    text
}

fn c_path(path: &Path) -> anyhow::Result<CString> {
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = path.to_string_lossy().into_owned().into_bytes();
    CString::new(bytes).map_err(|_| anyhow::anyhow!("config path contains a NUL byte"))
}

#[derive(Debug)]
enum Command {
    Run(PathBuf),
    Test(PathBuf),
    Template,
    Version,
}

#[derive(Debug)]
struct Settings {
    command: Command,
    log_level: String,
}

impl Settings {
    fn parse() -> anyhow::Result<Self> {
        let mut args = env::args_os().skip(1);
        let command = args
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing command\n{USAGE}"))?
            .to_string_lossy()
            .into_owned();
        let mut config = None;
        let mut log_level = "info".to_string();
        while let Some(arg) = args.next() {
            match arg.to_string_lossy().as_ref() {
                "--config" | "-c" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--config requires a value"))?;
                    config = Some(PathBuf::from(value));
                }
                "--log-level" => {
                    log_level = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--log-level requires a value"))?
                        .into_string()
                        .map_err(|_| anyhow::anyhow!("--log-level must be UTF-8"))?;
                }
                "--help" | "-h" => {
                    println!("{USAGE}");
                    std::process::exit(0);
                }
                other => anyhow::bail!("unknown argument: {other}\n{USAGE}"),
            }
        }

        let command = match command.as_str() {
            "run" => Command::Run(config.ok_or_else(|| anyhow::anyhow!("run requires --config"))?),
            "test" => {
                Command::Test(config.ok_or_else(|| anyhow::anyhow!("test requires --config"))?)
            }
            "template" => Command::Template,
            "version" => Command::Version,
            other => anyhow::bail!("unknown command: {other}\n{USAGE}"),
        };
        Ok(Self { command, log_level })
    }
}

fn install_log_sink(level: &str) -> anyhow::Result<()> {
    unsafe extern "C" fn log_sink(
        level: *const c_char,
        message: *const c_char,
        _breadcrumbs: u32,
        _context: *mut c_void,
    ) {
        if message.is_null() {
            return;
        }
        let entry = unsafe { CStr::from_ptr(message) }.to_string_lossy();
        let level = if level.is_null() {
            "info".into()
        } else {
            unsafe { CStr::from_ptr(level) }.to_string_lossy()
        };
        eprintln!("[engine][{level}] {entry}");
    }

    let sink = V2RayLogSink {
        log: Some(log_sink),
        context: ptr::null_mut(),
        enabled_breadcrumbs: u32::MAX,
    };
    let level = CString::new(level).map_err(|_| anyhow::anyhow!("invalid log level"))?;
    if !unsafe { V2RaySetLogSink(&sink, level.as_ptr()) } {
        anyhow::bail!("log sink rejected");
    }
    Ok(())
}
