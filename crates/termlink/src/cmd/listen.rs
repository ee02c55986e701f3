use std::sync::mpsc::{self, Sender};

use tracing::info;

use termlink_endpoint::ServerEndpoint;
use termlink_frame::Package;

use crate::cmd::ListenArgs;
use crate::exit::{endpoint_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_package, OutputFormat};

enum Event {
    Package(Package),
    Stop,
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let server =
        ServerEndpoint::listen(args.port).map_err(|err| endpoint_error("listen failed", err))?;
    eprintln!("listening on port {}", server.local_port());

    // Handlers run on the connection's receive thread; forward everything to
    // this thread so printing and counting stay serialized.
    let (tx, rx) = mpsc::channel::<Event>();
    register_forwarders(&server, &tx);

    server
        .start_accept(|peer| info!(%peer, "peer disconnected"))
        .map_err(|err| endpoint_error("accept failed", err))?;

    install_ctrlc_handler(tx)?;

    let mut printed = 0usize;
    while let Ok(event) = rx.recv() {
        match event {
            Event::Package(package) => {
                let peer = server
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|| "-".to_string());
                print_package(&package, &peer, format);
                printed = printed.saturating_add(1);
                if let Some(count) = args.count {
                    if printed >= count {
                        break;
                    }
                }
            }
            Event::Stop => break,
        }
    }

    server.shutdown();
    Ok(SUCCESS)
}

fn register_forwarders(server: &ServerEndpoint, tx: &Sender<Event>) {
    let sender = tx.clone();
    server.handlers().set_single_string(move |name, value| {
        let _ = sender.send(Event::Package(Package::single_string(name, value)));
    });

    let sender = tx.clone();
    server.handlers().set_single_int32(move |name, value| {
        let _ = sender.send(Event::Package(Package::single_int32(name, value)));
    });

    let sender = tx.clone();
    server.handlers().set_bytes(move |name, data| {
        let _ = sender.send(Event::Package(Package::bytes(name, data.to_vec())));
    });

    let sender = tx.clone();
    server.handlers().set_string_list(move |name, values| {
        let _ = sender.send(Event::Package(Package::string_list(
            name,
            values.to_vec(),
        )));
    });
}

fn install_ctrlc_handler(tx: Sender<Event>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let _ = tx.send(Event::Stop);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
