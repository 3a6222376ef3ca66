//! In-process stand-in for a target driver agent.
//!
//! Speaks the driver-control wire protocol over a local TCP port so the
//! registry and mirrors can be exercised end to end without a device.
//! Resources live in a small in-memory state shared across connections,
//! the way one agent serves many driver sessions.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread;
use std::time::Duration;
use tether_common::proto::{self, FmqQuery, Request, Response};

#[derive(Default)]
struct StubState {
    fmqs: HashMap<i64, Vec<serde_json::Value>>,
    mems: HashMap<i64, Vec<u8>>,
    handles: HashMap<i64, Vec<u8>>,
    launched: Vec<String>,
    callback_ports: Vec<u16>,
}

pub struct StubDriver {
    port: u16,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<StubState>>,
}

impl StubDriver {
    /// Spawn a stub agent that grants every launch request.
    pub fn spawn() -> Self {
        Self::spawn_inner(false)
    }

    /// Spawn a stub agent that refuses every launch request.
    pub fn refusing() -> Self {
        Self::spawn_inner(true)
    }

    fn spawn_inner(refuse_launch: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(Mutex::new(StubState::default()));
        let next_id = Arc::new(AtomicI64::new(0));

        let accept_running = Arc::clone(&running);
        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            while accept_running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let state = Arc::clone(&accept_state);
                        let next_id = Arc::clone(&next_id);
                        thread::spawn(move || serve(stream, state, next_id, refuse_launch));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => return,
                }
            }
        });

        Self {
            port,
            running,
            state,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Driver service names the agent was asked to launch.
    pub fn launched_services(&self) -> Vec<String> {
        self.state.lock().launched.clone()
    }

    /// Callback ports announced over any session.
    pub fn announced_callback_ports(&self) -> Vec<u16> {
        self.state.lock().callback_ports.clone()
    }
}

impl Drop for StubDriver {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn serve(
    stream: TcpStream,
    state: Arc<Mutex<StubState>>,
    next_id: Arc<AtomicI64>,
    refuse_launch: bool,
) {
    stream.set_nonblocking(false).unwrap();
    let mut stream = stream;
    loop {
        let request: Request = match proto::read_frame(&mut stream) {
            Ok(request) => request,
            Err(_) => return,
        };
        let is_exit = matches!(request, Request::Exit);
        let response = handle(request, &state, &next_id, refuse_launch);
        if proto::write_frame(&mut stream, &response).is_err() {
            return;
        }
        if is_exit {
            return;
        }
    }
}

fn handle(
    request: Request,
    state: &Mutex<StubState>,
    next_id: &AtomicI64,
    refuse_launch: bool,
) -> Response {
    let mut state = state.lock();
    match request {
        Request::SetCallbackPort { port } => {
            state.callback_ports.push(port);
            Response::success()
        }
        Request::LaunchDriver { service_name, .. } => {
            if refuse_launch {
                Response::failure(format!("launch of '{service_name}' refused"))
            } else {
                state.launched.push(service_name);
                Response::success()
            }
        }
        Request::LoadHal { target_type, .. } => {
            if target_type == "broken" {
                Response::success().with_resource_id(-1)
            } else {
                Response::success().with_resource_id(next_id.fetch_add(1, Ordering::SeqCst))
            }
        }
        Request::LoadLib { file_name, .. } => {
            if file_name == "libbroken.so" {
                Response::success().with_resource_id(-1)
            } else {
                Response::success().with_resource_id(next_id.fetch_add(1, Ordering::SeqCst))
            }
        }
        Request::HalCall { api, .. } | Request::LibCall { api, .. } => {
            Response::success().with_payload(serde_json::Value::String(format!("{api}:ok")))
        }
        Request::ExecuteShell { commands } => {
            let mut response = Response::success();
            for command in commands {
                if command.starts_with("fail") {
                    response.stdout.push(String::new());
                    response.stderr.push("command failed".to_string());
                    response.exit_code.push(1);
                } else {
                    response.stdout.push(format!("ran:{command}"));
                    response.stderr.push(String::new());
                    response.exit_code.push(0);
                }
            }
            response
        }
        Request::FmqCreate {
            data_type,
            existing_queue_id,
            ..
        } => {
            if data_type == "unsupported_t" {
                return Response::success().with_resource_id(-1);
            }
            if let Some(source) = existing_queue_id {
                if !state.fmqs.contains_key(&source) {
                    return Response::success().with_resource_id(-1);
                }
            }
            let id = next_id.fetch_add(1, Ordering::SeqCst);
            state.fmqs.insert(id, Vec::new());
            Response::success().with_resource_id(id)
        }
        Request::FmqWrite { queue_id, data } => match state.fmqs.get_mut(&queue_id) {
            Some(queue) => {
                queue.extend(data);
                Response::success().with_payload(serde_json::Value::Bool(true))
            }
            None => Response::failure(format!("no queue {queue_id}")),
        },
        Request::FmqRead { queue_id, count } => match state.fmqs.get_mut(&queue_id) {
            Some(queue) if queue.len() >= count as usize => {
                let items: Vec<_> = queue.drain(..count as usize).collect();
                Response::success().with_payload(serde_json::Value::Array(items))
            }
            Some(_) => Response::success().with_payload(serde_json::Value::Null),
            None => Response::failure(format!("no queue {queue_id}")),
        },
        Request::FmqState { queue_id, query } => match query {
            FmqQuery::AvailableToRead => {
                let len = state.fmqs.get(&queue_id).map(Vec::len).unwrap_or(0);
                Response::success().with_payload(serde_json::json!(len))
            }
            FmqQuery::AvailableToWrite => {
                Response::success().with_payload(serde_json::json!(u16::MAX))
            }
            FmqQuery::IsValid => Response::success()
                .with_payload(serde_json::Value::Bool(state.fmqs.contains_key(&queue_id))),
        },
        Request::MemAllocate { size } => {
            if size == 0 {
                Response::success().with_resource_id(-1)
            } else {
                let id = next_id.fetch_add(1, Ordering::SeqCst);
                state.mems.insert(id, vec![0; size as usize]);
                Response::success().with_resource_id(id)
            }
        }
        Request::MemRead { mem_id, start, len } => match state.mems.get(&mem_id) {
            Some(region) => {
                let start = start as usize;
                let end = (start + len as usize).min(region.len());
                Response::success().with_payload(serde_json::json!(region[start..end].to_vec()))
            }
            None => Response::failure(format!("no memory region {mem_id}")),
        },
        Request::MemWrite {
            mem_id,
            start,
            data,
        } => match state.mems.get_mut(&mem_id) {
            Some(region) => {
                let start = start as usize;
                region[start..start + data.len()].copy_from_slice(&data);
                Response::success()
            }
            None => Response::failure(format!("no memory region {mem_id}")),
        },
        Request::HandleCreate { path, .. } => {
            if path.starts_with("/nonexistent") {
                Response::success().with_resource_id(-1)
            } else {
                let id = next_id.fetch_add(1, Ordering::SeqCst);
                state.handles.insert(id, Vec::new());
                Response::success().with_resource_id(id)
            }
        }
        Request::HandleRead { handle_id, len } => match state.handles.get(&handle_id) {
            Some(contents) => {
                let end = (len as usize).min(contents.len());
                Response::success().with_payload(serde_json::json!(contents[..end].to_vec()))
            }
            None => Response::failure(format!("no handle {handle_id}")),
        },
        Request::HandleWrite { handle_id, data } => match state.handles.get_mut(&handle_id) {
            Some(contents) => {
                let written = data.len() as u64;
                contents.extend_from_slice(&data);
                Response::success().with_payload(serde_json::json!(written))
            }
            None => Response::failure(format!("no handle {handle_id}")),
        },
        Request::ReleaseResource { id, .. } => {
            state.fmqs.remove(&id);
            state.mems.remove(&id);
            state.handles.remove(&id);
            Response::success()
        }
        Request::Exit => Response::success(),
    }
}
