//! Decodes radio frames given as hex, one per argument or per stdin line
//!
//! ```text
//! frame-decode "7E 80 2A 05 88 17 A1 54 00 18 A1 54 00 03 06 A0 6E 1E 05 04 00"
//! ```

use std::io::{self, BufRead};

use frisquet_gateway::protocol::{Body, Frame};
use frisquet_gateway::util::{hex_dump, parse_hex};
use tracing::{error, Level};

fn describe(frame: &Frame) -> String {
    let body = match &frame.body {
        Body::ReadRequest(region) => format!("read {}", region),
        Body::Write { target, echo, data } => {
            format!("write {} echo {} data [{}]", target, echo, hex_dump(data))
        }
        Body::Data(data) => format!("data [{}]", hex_dump(data)),
        Body::Raw(data) => format!("raw [{}]", hex_dump(data)),
    };
    format!("{} | {}", frame.header, body)
}

fn decode_line(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    match parse_hex(line).and_then(|bytes| Frame::decode(&bytes)) {
        Ok(frame) => {
            println!("{}", describe(&frame));
            true
        }
        Err(err) => {
            error!(input = line, error = %err, "cannot decode frame");
            false
        }
    }
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).with_writer(io::stderr).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut ok = true;

    if args.is_empty() {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => ok &= decode_line(&line),
                Err(err) => {
                    error!(error = %err, "failed to read stdin");
                    ok = false;
                    break;
                }
            }
        }
    } else {
        for arg in &args {
            ok &= decode_line(arg);
        }
    }

    if !ok {
        std::process::exit(1);
    }
}
