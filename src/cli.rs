use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;

use scanlens::parser::{self, Command};
use scanlens::server::{ErrorBody, SearchRequest, SearchResponse};
use scanlens::service::AnalysisOutcome;
use scanlens::vision::ImageUpload;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Interactive client for the scanlens API", long_about = None)]
struct Args {
    #[clap(long, env = "SCANLENS_SERVER", default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Sent with ANALYZE requests; the server's own key is used when absent
    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

struct Session {
    base: String,
    api_key: Option<String>,
    http: Client,
}

fn main() {
    let args = Args::parse();
    print_banner();

    let http = match Client::builder().timeout(Duration::from_secs(180)).build() {
        Ok(c) => c,
        Err(e) => {
            println!("[\u{2717}] Could not build HTTP client: {}", e);
            return;
        }
    };
    let session = Session {
        base: args.server.trim_end_matches('/').to_string(),
        api_key: args.api_key,
        http,
    };

    match session.health() {
        Ok(()) => println!("[\u{2713}] Connected to scanlens at {}!", session.base),
        Err(_) => {
            println!("[\u{2717}] Could not reach server at {}.", session.base);
            println!("    Make sure 'cargo run --release --bin scanlens' is running in another terminal.");
            return;
        }
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("scanlens> ");
        let _ = io::stdout().flush();
        buffer.clear();

        match stdin.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() {
            continue;
        }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = session.execute(cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                let upper = buffer.trim_start().to_uppercase();
                if upper.starts_with("SEARCH") || upper.starts_with("FIND") {
                    println!("    \u{2139}\u{fe0f}  Hint: Quote the question: SEARCH \"pleural effusion\" LIMIT 3");
                } else if upper.starts_with("ANALYZE") || upper.starts_with("UPLOAD") {
                    println!("    \u{2139}\u{fe0f}  Hint: Quote the path: ANALYZE 'scans/chest.png'");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   scanlens CLI - Medical Image Analysis Search");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. ANALYZE:  ANALYZE 'path/to/image.png'");
    println!("2. SEARCH:   SEARCH \"question about past analyses\" LIMIT 5");
    println!("3. HEALTH:   HEALTH");
    println!("4. EXIT:     Quit\n");
}

impl Session {
    fn execute(&self, cmd: Command) -> Result<(), String> {
        match cmd {
            Command::Help => {
                print_help();
                Ok(())
            }
            Command::Health => self.health().map(|_| println!("[\u{2713} OK] Server is healthy.")),
            Command::Analyze { path } => self.analyze(&path),
            Command::Search { query, limit } => self.search(query, limit),
            Command::Exit => Ok(()),
        }
    }

    fn health(&self) -> Result<(), String> {
        let resp = self
            .http
            .get(format!("{}/health", self.base))
            .send()
            .map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("Health check returned {}", resp.status()))
        }
    }

    fn analyze(&self, path: &Path) -> Result<(), String> {
        let bytes = fs::read(path).map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let upload = ImageUpload {
            image: STANDARD.encode(&bytes),
            filename,
            api_key: self.api_key.clone(),
        };

        println!("Analyzing {} ({} bytes)...", upload.filename, bytes.len());
        let outcome: AnalysisOutcome = self.post("analyze", &upload)?;

        println!("\n[\u{2713} OK] Recorded as {}\n", outcome.id);
        println!("--- Analysis ---\n{}\n", outcome.analysis);
        println!("--- References ---\n{}\n", outcome.references);
        Ok(())
    }

    fn search(&self, query: String, limit: usize) -> Result<(), String> {
        let resp: SearchResponse = self.post("search", &SearchRequest { query, k: limit })?;

        if resp.results.is_empty() {
            println!("No relevant past analyses found.\n");
            return Ok(());
        }

        println!("\nFound {} matches:", resp.results.len());
        for hit in resp.results {
            let filename = hit.metadata.get("filename").map(String::as_str).unwrap_or("?");
            let date = hit.metadata.get("date").map(String::as_str).unwrap_or("?");
            println!("\n  \u{2022} {} ({}) | score {:.4}", filename, date, hit.score);
            for line in hit.document.lines() {
                println!("    {}", line);
            }
        }
        println!();
        Ok(())
    }

    fn post<B: serde::Serialize, R: DeserializeOwned>(&self, route: &str, body: &B) -> Result<R, String> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base, route))
            .json(body)
            .send()
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if status.is_success() {
            resp.json::<R>().map_err(|e| e.to_string())
        } else {
            let detail = resp
                .json::<ErrorBody>()
                .map(|b| b.error)
                .unwrap_or_else(|_| "no details".to_string());
            Err(format!("Server returned {}: {}", status, detail))
        }
    }
}
