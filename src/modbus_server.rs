use std::collections::HashMap;
use std::future::{self, Ready};
use std::net::SocketAddr;
use tokio_modbus::prelude::*;
use tokio_modbus::server::Service;
use tokio_modbus::ExceptionCode;
use tracing::{debug, error, info};

use crate::config::ModbusConfig;
use crate::models::forecast::{Metric, ModbusRegister};
use crate::shared_state::AppState;

/// What a single register address resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterSlot {
    /// `word` 0 = high word (bits 31..16), 1 = low word (bits 15..0)
    Variable { position: u16, word: u8 },
    /// Instance status code as a raw u16
    Status,
}

pub type RegisterMap = HashMap<u16, RegisterSlot>;

/// Encode a raw f32 value into two u16 big-endian words (IEEE 754).
/// high = bits 31..16, low = bits 15..0
fn float_to_words(v: f32) -> (u16, u16) {
    let bits = v.to_bits();
    ((bits >> 16) as u16, (bits & 0xFFFF) as u16)
}

/// Variable `n` occupies `base + 2n` (high word) and `base + 2n + 1` (low word).
pub fn register_map(cfg: &ModbusConfig) -> RegisterMap {
    let mut map = HashMap::new();
    for metric in Metric::ALL {
        let position = metric.position();
        let address = cfg.base_address.saturating_add(2 * position);
        map.insert(address, RegisterSlot::Variable { position, word: 0 });
        map.insert(address.saturating_add(1), RegisterSlot::Variable { position, word: 1 });
    }
    map.insert(cfg.status_address, RegisterSlot::Status);
    map
}

/// Human readable register layout for the REST API.
pub fn register_info(cfg: &ModbusConfig) -> Vec<ModbusRegister> {
    let mut info: Vec<ModbusRegister> = Metric::ALL
        .iter()
        .map(|metric| ModbusRegister {
            register_address: cfg.base_address.saturating_add(2 * metric.position()),
            length: 2,
            data_type: "float32 IEEE 754 (2 regs)".to_string(),
            description: metric.label().to_string(),
        })
        .collect();

    info.push(ModbusRegister {
        register_address: cfg.status_address,
        length: 1,
        data_type: "uint16".to_string(),
        description: "instance status code".to_string(),
    });
    info
}

fn resolve(state: &AppState, register_map: &RegisterMap, address: u16) -> u16 {
    match register_map.get(&address) {
        Some(RegisterSlot::Status) => state.status().code(),
        Some(RegisterSlot::Variable { position, word }) => {
            let value = state.variable_at(*position).map(|v| v.value as f32).unwrap_or(0.0);
            let (high, low) = float_to_words(value);
            debug!(
                "[MODBUS] position {} = {:.4} → hi=0x{:04X} lo=0x{:04X} (addr {})",
                position, value, high, low, address
            );
            if *word == 0 { high } else { low }
        }
        None => 0,
    }
}

/// Reads `count` registers starting at `address`; unmapped addresses read as 0.
pub fn read_block(
    state: &AppState,
    register_map: &RegisterMap,
    address: u16,
    count: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    if u32::from(address) + u32::from(count) > u32::from(u16::MAX) + 1 {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok((0..count).map(|i| resolve(state, register_map, address + i)).collect())
}

struct MbService {
    state: AppState,
    register_map: RegisterMap,
}

impl Service for MbService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let result = match req {
            Request::ReadInputRegisters(addr, cnt) => {
                read_block(&self.state, &self.register_map, addr, cnt).map(Response::ReadInputRegisters)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                read_block(&self.state, &self.register_map, addr, cnt).map(Response::ReadHoldingRegisters)
            }
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(result)
    }
}

pub async fn run_server(addr: SocketAddr, state: AppState, register_map: RegisterMap) -> std::io::Result<()> {
    info!("Modbus TCP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = tokio_modbus::server::tcp::Server::new(listener);

    let on_connected = move |socket, _addr| {
        let state = state.clone();
        let register_map = register_map.clone();
        async move { Ok::<_, std::io::Error>(Some((MbService { state, register_map }, socket))) }
    };

    server.serve(&on_connected, |err| { error!("Modbus server error: {:?}", err); }).await
}
