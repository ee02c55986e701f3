use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;

use bytes::BytesMut;

use termlink_frame::{encode_package, Package, ReceiveAssembler};

use crate::cmd::SendArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_package, OutputFormat};

const READ_CHUNK_SIZE: usize = 8 * 1024;

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let package = build_package(&args)?;

    // Written directly on this thread: exiting right after an endpoint's
    // queued send could race the worker and drop the package.
    let mut stream = TcpStream::connect((args.host.as_str(), args.port))
        .map_err(|err| io_error("connect failed", err))?;

    let mut wire = BytesMut::new();
    encode_package(&package, &mut wire).map_err(|err| frame_error("encode failed", err))?;
    stream
        .write_all(&wire)
        .map_err(|err| io_error("send failed", err))?;

    if args.wait {
        let response = read_one_package(&mut stream)?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "-".to_string());
        print_package(&response, &peer, format);
    }

    Ok(SUCCESS)
}

fn build_package(args: &SendArgs) -> CliResult<Package> {
    if let Some(value) = &args.string {
        return Ok(Package::single_string(&args.name, value));
    }
    if let Some(value) = args.int {
        return Ok(Package::single_int32(&args.name, value));
    }
    if let Some(path) = &args.file {
        let data = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return Ok(Package::bytes(&args.name, data));
    }
    if let Some(values) = &args.list {
        return Ok(Package::string_list(&args.name, values.clone()));
    }
    Err(CliError::new(
        USAGE,
        "one of --string, --int, --file, --list is required",
    ))
}

fn read_one_package(stream: &mut TcpStream) -> CliResult<Package> {
    let mut assembler = ReceiveAssembler::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = stream
            .read(&mut chunk)
            .map_err(|err| io_error("receive failed", err))?;
        if read == 0 {
            return Err(CliError::new(
                FAILURE,
                "connection closed before a package arrived",
            ));
        }
        assembler.feed(&chunk[..read]);
        if let Some(package) = assembler
            .next_package()
            .map_err(|err| frame_error("decode failed", err))?
        {
            return Ok(package);
        }
    }
}
