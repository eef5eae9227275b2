//! Shared in-memory fake of the PC/SC transport, used by every integration
//! test in this directory so none of them touch real hardware.

use oath_daemon_lib::constants::{
    INS_CALCULATE, INS_DELETE, INS_LIST, INS_PUT, INS_SELECT, INS_SET_CODE, INS_VALIDATE,
    OATH_AID, PBKDF2_ITERATIONS, SW_NO_SUCH_OBJECT, SW_SECURITY_STATUS_NOT_SATISFIED, SW_SUCCESS,
    TAG_CHALLENGE, TAG_IMF, TAG_KEY, TAG_NAME, TAG_NAME_LIST, TAG_PROPERTY, TAG_RESPONSE,
    TAG_SERIAL_NUMBER, TAG_TRUNCATED_RESPONSE, TAG_VERSION,
};
use oath_daemon_lib::oath::apdu::{encode_tlv, find_tlv, parse_tlv};
use oath_daemon_lib::oath::error::{PcscError, PcscResult};
use oath_daemon_lib::oath::pcsc_context::{
    CardDisposition, CardHandle, CardProtocol, PcscTransport, ReaderCardState,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

type HmacSha1 = Hmac<Sha1>;

#[derive(Clone, Default)]
pub struct FakeCredential {
    pub name: String,
    pub digits: u8,
    pub value: u32,
    pub requires_touch: bool,
}

pub struct FakeTransportOptions {
    pub device_id_bytes: Vec<u8>,
    pub requires_password: bool,
    pub password: Option<String>,
    pub serial: u32,
    pub firmware: (u8, u8, u8),
    pub credentials: Vec<FakeCredential>,
    pub connect_failures: usize,
}

impl Default for FakeTransportOptions {
    fn default() -> Self {
        Self {
            device_id_bytes: vec![0xDE, 0xAD, 0xBE, 0xEF],
            requires_password: false,
            password: None,
            serial: 12345678,
            firmware: (5, 4, 3),
            credentials: Vec::new(),
            connect_failures: 0,
        }
    }
}

struct FakeState {
    device_id_bytes: Vec<u8>,
    device_challenge: Vec<u8>,
    auth_key: Option<[u8; 16]>,
    serial: u32,
    firmware: (u8, u8, u8),
    credentials: Vec<FakeCredential>,
    connect_failures_remaining: usize,
}

/// Stand-in for a real reader: answers OATH applet APDUs the way a token
/// would, keyed entirely off instruction/P1 (mirrors the teacher's own
/// fixed-response fakes for the PTY-backed `ykman` transport).
pub struct FakeTransport {
    state: Mutex<FakeState>,
    next_handle: AtomicU64,
}

impl FakeTransport {
    pub fn new(opts: FakeTransportOptions) -> Self {
        let auth_key = opts.password.as_ref().map(|p| derive_key(p.as_bytes(), &opts.device_id_bytes));
        let device_challenge = if opts.requires_password { vec![0x11; 8] } else { Vec::new() };
        Self {
            state: Mutex::new(FakeState {
                device_id_bytes: opts.device_id_bytes,
                device_challenge,
                auth_key,
                serial: opts.serial,
                firmware: opts.firmware,
                credentials: opts.credentials,
                connect_failures_remaining: opts.connect_failures,
            }),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn requires_password(&self) -> bool {
        self.state.lock().unwrap().auth_key.is_some()
    }

    fn select_response(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut out = encode_tlv(TAG_NAME, &state.device_id_bytes);
        out.extend(encode_tlv(TAG_VERSION, &[state.firmware.0, state.firmware.1, state.firmware.2]));
        out.extend(encode_tlv(TAG_SERIAL_NUMBER, &state.serial.to_be_bytes()));
        if state.auth_key.is_some() {
            out.extend(encode_tlv(TAG_CHALLENGE, &state.device_challenge));
        }
        out.extend_from_slice(&SW_SUCCESS.to_be_bytes());
        out
    }

    fn calculate_all_response(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        for cred in &state.credentials {
            // NAME carries the raw credential name, no algo/type prefix;
            // `isTotp` comes from the TRUNCATED_RESPONSE tag that follows.
            out.extend(encode_tlv(TAG_NAME, cred.name.as_bytes()));
            let mut trunc = vec![cred.digits];
            trunc.extend_from_slice(&cred.value.to_be_bytes());
            out.extend(encode_tlv(TAG_TRUNCATED_RESPONSE, &trunc));
        }
        out.extend_from_slice(&SW_SUCCESS.to_be_bytes());
        out
    }

    /// Nitrokey LIST v1: `NAME_LIST` (0x72) entries, each `algoByte + name +
    /// propertiesByte`, with no codes.
    fn list_v1_response(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        for cred in &state.credentials {
            let mut value = vec![0x21];
            value.extend_from_slice(cred.name.as_bytes());
            value.push(if cred.requires_touch { 0x01 } else { 0x00 });
            out.extend(encode_tlv(TAG_NAME_LIST, &value));
        }
        out.extend_from_slice(&SW_SUCCESS.to_be_bytes());
        out
    }

    /// Standard LIST (the fallback when LIST v1 is unsupported): `NAME_LIST`
    /// entries of `algoByte + name`, no properties byte, no codes.
    fn name_list_response(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        for cred in &state.credentials {
            let mut value = vec![0x21];
            value.extend_from_slice(cred.name.as_bytes());
            out.extend(encode_tlv(TAG_NAME_LIST, &value));
        }
        out.extend_from_slice(&SW_SUCCESS.to_be_bytes());
        out
    }

    fn calculate_one_response(&self, name: &str) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        match state.credentials.iter().find(|c| c.name == name) {
            Some(cred) => {
                let mut trunc = vec![cred.digits];
                trunc.extend_from_slice(&cred.value.to_be_bytes());
                let mut out = encode_tlv(TAG_TRUNCATED_RESPONSE, &trunc);
                out.extend_from_slice(&SW_SUCCESS.to_be_bytes());
                out
            }
            None => SW_NO_SUCH_OBJECT.to_be_bytes().to_vec(),
        }
    }

    fn validate_response(&self, request_data: &[u8]) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        let Some(key) = state.auth_key else {
            return SW_SECURITY_STATUS_NOT_SATISFIED.to_be_bytes().to_vec();
        };
        let tlvs = parse_tlv(request_data);
        let client_response = find_tlv(&tlvs, TAG_RESPONSE).map(|t| t.value.clone()).unwrap_or_default();
        let client_challenge = find_tlv(&tlvs, TAG_CHALLENGE).map(|t| t.value.clone()).unwrap_or_default();
        let expected_from_client = hmac_sha1(&key, &state.device_challenge);
        if client_response != expected_from_client {
            return SW_SECURITY_STATUS_NOT_SATISFIED.to_be_bytes().to_vec();
        }
        let response_to_client = hmac_sha1(&key, &client_challenge);
        let mut out = encode_tlv(TAG_RESPONSE, &response_to_client);
        out.extend_from_slice(&SW_SUCCESS.to_be_bytes());
        // A freshly validated session also re-rolls the device challenge, the
        // way a real applet would after consuming the old one.
        state.device_challenge = vec![0x22; 8];
        out
    }

    fn put_response(&self, data: &[u8]) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        let tlvs = parse_tlv(data);
        let Some(name) = find_tlv(&tlvs, TAG_NAME) else {
            return SW_NO_SUCH_OBJECT.to_be_bytes().to_vec();
        };
        let digits = find_tlv(&tlvs, TAG_KEY).map(|t| t.value.get(1).copied().unwrap_or(6)).unwrap_or(6);
        let _ = find_tlv(&tlvs, TAG_PROPERTY);
        let _ = find_tlv(&tlvs, TAG_IMF);
        let name = String::from_utf8_lossy(&name.value).to_string();
        state.credentials.retain(|c| c.name != name);
        state.credentials.push(FakeCredential { name, digits, value: 0, requires_touch: false });
        SW_SUCCESS.to_be_bytes().to_vec()
    }

    fn delete_response(&self, data: &[u8]) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        let tlvs = parse_tlv(data);
        let Some(name) = find_tlv(&tlvs, TAG_NAME) else {
            return SW_NO_SUCH_OBJECT.to_be_bytes().to_vec();
        };
        let name = String::from_utf8_lossy(&name.value).to_string();
        let before = state.credentials.len();
        state.credentials.retain(|c| c.name != name);
        if state.credentials.len() == before {
            SW_NO_SUCH_OBJECT.to_be_bytes().to_vec()
        } else {
            SW_SUCCESS.to_be_bytes().to_vec()
        }
    }

    fn set_code_response(&self, data: &[u8]) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        if data.is_empty() {
            state.auth_key = None;
        } else {
            let tlvs = parse_tlv(data);
            if let Some(key_tlv) = find_tlv(&tlvs, TAG_KEY) {
                if key_tlv.value.len() >= 17 {
                    let mut key = [0u8; 16];
                    key.copy_from_slice(&key_tlv.value[1..17]);
                    state.auth_key = Some(key);
                }
            }
        }
        SW_SUCCESS.to_be_bytes().to_vec()
    }
}

fn derive_key(password: &[u8], salt: &[u8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    pbkdf2_hmac::<Sha1>(password, salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn hmac_sha1(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Splits a short-form APDU into `(ins, p1, data)`; `Lc` is only present when
/// the builder that produced the command actually attached a data field.
fn split_apdu(command: &[u8], has_data: bool) -> (u8, u8, &[u8]) {
    let ins = command[1];
    let p1 = command[2];
    if !has_data || command.len() <= 4 {
        return (ins, p1, &[]);
    }
    let lc = command[4] as usize;
    (ins, p1, &command[5..5 + lc.min(command.len() - 5)])
}

#[async_trait]
impl PcscTransport for FakeTransport {
    fn list_readers(&self) -> PcscResult<Vec<String>> {
        Ok(vec!["Fake Reader 0".to_string()])
    }

    fn reader_card_state(&self, _reader_name: &str) -> PcscResult<ReaderCardState> {
        Ok(ReaderCardState::Present)
    }

    fn connect(&self, _reader_name: &str, _timeout_ms: u64) -> PcscResult<(CardHandle, CardProtocol)> {
        let mut state = self.state.lock().unwrap();
        if state.connect_failures_remaining > 0 {
            state.connect_failures_remaining -= 1;
            return Err(PcscError::Timeout);
        }
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        Ok((CardHandle(id), CardProtocol::T1))
    }

    fn reconnect(&self, _handle: CardHandle, _disposition: CardDisposition) -> PcscResult<CardProtocol> {
        Ok(CardProtocol::T1)
    }

    fn disconnect(&self, _handle: CardHandle, _disposition: CardDisposition) -> PcscResult<()> {
        Ok(())
    }

    fn begin_transaction(&self, _handle: CardHandle) -> PcscResult<()> {
        Ok(())
    }

    fn end_transaction(&self, _handle: CardHandle, _disposition: CardDisposition) -> PcscResult<()> {
        Ok(())
    }

    fn transmit(&self, _handle: CardHandle, _protocol: CardProtocol, command: &[u8]) -> PcscResult<Vec<u8>> {
        let ins = command[1];
        let p1 = command[2];
        match (ins, p1) {
            (i, 0x04) if i == INS_SELECT => {
                let (_, _, data) = split_apdu(command, true);
                if data == OATH_AID {
                    Ok(self.select_response())
                } else {
                    // Management/OTP/PIV probe, never reached once SELECT OATH
                    // already carried a nonzero serial; fail fast either way.
                    Ok(vec![0x6A, 0x82])
                }
            }
            (i, 0x00) if i == oath_daemon_lib::constants::INS_CALCULATE_ALL => Ok(self.calculate_all_response()),
            (i, 0x00) if i == INS_CALCULATE => {
                let (_, _, data) = split_apdu(command, true);
                let tlvs = parse_tlv(data);
                let name = find_tlv(&tlvs, TAG_NAME).map(|t| String::from_utf8_lossy(&t.value).to_string()).unwrap_or_default();
                Ok(self.calculate_one_response(&name))
            }
            (i, 0x00) if i == INS_LIST => {
                let (_, _, data) = split_apdu(command, true);
                if data.first() == Some(&0x01) {
                    Ok(self.list_v1_response())
                } else {
                    Ok(self.name_list_response())
                }
            }
            (i, 0x00) if i == INS_PUT => {
                let (_, _, data) = split_apdu(command, true);
                Ok(self.put_response(data))
            }
            (i, 0x00) if i == INS_DELETE => {
                let (_, _, data) = split_apdu(command, true);
                Ok(self.delete_response(data))
            }
            (i, 0x00) if i == INS_SET_CODE => {
                let (_, _, data) = split_apdu(command, true);
                Ok(self.set_code_response(data))
            }
            (i, 0x00) if i == INS_VALIDATE => {
                let (_, _, data) = split_apdu(command, true);
                Ok(self.validate_response(data))
            }
            _ => Ok(vec![0x6A, 0x82]),
        }
    }

    fn release(&self) -> PcscResult<()> {
        Ok(())
    }

    fn reestablish(&self) -> PcscResult<()> {
        Ok(())
    }
}

