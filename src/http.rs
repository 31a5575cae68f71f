use crate::datastore::DataStore;
use rouille::Response;
use std::io;
use std::sync::{Arc, RwLock};

pub fn launch_http_server(bind_address: String, data_store: Arc<RwLock<DataStore>>) -> io::Result<()> {
    std::thread::Builder::new()
        .name("HTTP Server".to_string())
        .spawn(move || {
            info!("Starting HTTP server on {}", bind_address);
            rouille::start_server(bind_address, move |request| {
                info!("{} {}", request.method(), request.url());
                route(&request.url(), &data_store)
            })
        })?;
    Ok(())
}

fn route(url: &str, data_store: &RwLock<DataStore>) -> Response {
    let data_store = match data_store.read() {
        Ok(data_store) => data_store,
        Err(_) => {
            error!("History lock poisoned");
            return Response::text("An error occured!").with_status_code(500);
        }
    };
    match url {
        "/debug" => Response::text(data_store.to_string()),
        "/latest" => match data_store.latest() {
            Some(sample) => Response::text(format!("{}\n", sample)),
            None => Response::text("no samples yet\n").with_status_code(404),
        },
        _ => Response::empty_404(),
    }
}
