mod logger;
mod server;

use clap::Parser;
use log::{debug, error, info};
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use logger::{LogSink, Severity};
use server::HttpServer;
use server::config::ServerConfig;
use server::observer::LogObserver;
use server::signal;

fn main() -> ExitCode {
    let config = ServerConfig::parse();

    let sink = match LogSink::open(&config.log_config()) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            logger::print_fatal(&format!(
                "Cannot open log file {}: {}",
                config.log_file.display(),
                e
            ));
            return ExitCode::from(1);
        }
    };
    logger::init(Arc::clone(&sink));
    debug!("Starting static file server with config: {:?}", config);
    debug!("Logging to {}", sink.path().display());

    let port = match config.resolve_port() {
        Ok(port) => port,
        Err(e) => {
            logger::print_fatal(&e.to_string());
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    if config.log_crashes {
        let guard_sink = Arc::clone(&sink);
        with_error_boundary(&guard_sink, || serve(&config, port, sink))
    } else {
        serve(&config, port, sink)
    }
}

fn serve(config: &ServerConfig, port: u16, sink: Arc<LogSink>) -> ExitCode {
    let document_root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            logger::print_fatal(&format!("Cannot read current directory: {}", e));
            error!("Cannot read current directory: {}", e);
            return ExitCode::from(1);
        }
    };

    let mut server = match HttpServer::bind(config, port, &document_root, LogObserver::new(sink)) {
        Ok(server) => server,
        Err(e) => {
            logger::print_fatal(&format!("Socket error: {}", e));
            error!("Socket error: {}", e);
            info!("Shutting down the server.");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = signal::install() {
        error!("Cannot install interrupt handler: {}", e);
    }

    println!("Serving on port {}", server.local_addr().port());

    match server.run(signal::interrupted()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::from(1),
    }
}

static LAST_PANIC: Mutex<Option<String>> = Mutex::new(None);

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `body` inside an error boundary: a panic is written to the log at
/// CRITICAL with its location and backtrace, then unwinding resumes.
fn with_error_boundary(sink: &LogSink, body: impl FnOnce() -> ExitCode) -> ExitCode {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let report = format!("{}\n{}", info, Backtrace::force_capture());
        if let Ok(mut last) = LAST_PANIC.lock() {
            *last = Some(report);
        }
        default_hook(info);
    }));

    let result = panic::catch_unwind(AssertUnwindSafe(body));
    // Dropping our hook reinstates the default one.
    let _ = panic::take_hook();

    match result {
        Ok(code) => code,
        Err(payload) => {
            let report = LAST_PANIC
                .lock()
                .ok()
                .and_then(|mut last| last.take())
                .unwrap_or_else(|| panic_message(payload.as_ref()));
            sink.write(Severity::Critical, format_args!("Uncaught exception: {}", report));
            panic::resume_unwind(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logger::LogConfig;

    #[test]
    fn payload_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }

    #[test]
    fn boundary_passes_exit_code_through() {
        let path = std::env::temp_dir().join(format!("sfs-boundary-ok-{}.log", std::process::id()));
        let sink = LogSink::open(&LogConfig {
            path: path.clone(),
            truncate: true,
            threshold: Severity::Info,
            timezone: None,
        })
        .unwrap();

        let code = with_error_boundary(&sink, || ExitCode::from(7));
        assert_eq!(format!("{:?}", code), format!("{:?}", ExitCode::from(7)));
        assert!(std::fs::read_to_string(&path).unwrap().is_empty());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn boundary_logs_panic_as_critical() {
        let path = std::env::temp_dir().join(format!("sfs-boundary-panic-{}.log", std::process::id()));
        let sink = LogSink::open(&LogConfig {
            path: path.clone(),
            truncate: true,
            threshold: Severity::Info,
            timezone: None,
        })
        .unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            with_error_boundary(&sink, || panic!("listener exploded"))
        }));
        assert!(outcome.is_err());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains(" - CRITICAL - Uncaught exception: "));
        assert!(contents.contains("listener exploded"));
        std::fs::remove_file(path).ok();
    }
}
