//! Registry client for the `SMC_PNETID` generic netlink family.
//!
//! Encodes and decodes the four registry requests (add, delete, flush,
//! dump) and drives synchronous request/reply exchanges over a blocking
//! netlink socket. Dump replies are decoded into [`RegistryFact`] values
//! and handed to the caller before `get()` returns.

use std::fmt::Debug;
use std::io;
use std::os::fd::AsRawFd;
use std::time::Duration;

use netlink_packet_core::{
    NetlinkBuffer, NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST,
};
use netlink_packet_generic::ctrl::nlas::GenlCtrlAttrs;
use netlink_packet_generic::ctrl::{GenlCtrl, GenlCtrlCmd};
use netlink_packet_generic::{GenlFamily, GenlHeader, GenlMessage};
use netlink_packet_utils::nla::{DefaultNla, Nla, NlaBuffer, NlasIterator};
use netlink_packet_utils::parsers::{parse_string, parse_u8};
use netlink_packet_utils::{DecodeError, Emitable, Parseable, ParseableParametrized};
use netlink_sys::protocols::NETLINK_GENERIC;
use netlink_sys::{Socket, SocketAddr};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::table::RegistryFact;
use crate::types::{Pnetid, IB_DEFAULT_PORT, MAX_PNETID_LEN};

/// Name of the pnetid registry's generic netlink family.
pub const SMC_GENL_FAMILY_NAME: &str = "SMC_PNETID";

/// Version of the pnetid registry's generic netlink family.
pub const SMC_GENL_FAMILY_VERSION: u8 = 1;

/// Interface name length limit, including the terminating NUL.
const IFNAMSIZ: usize = 16;

/// InfiniBand device name length limit, including the terminating NUL.
const IB_DEVICE_NAME_MAX: usize = 64;

/// Registry commands.
const SMC_PNETID_GET: u8 = 1;
const SMC_PNETID_ADD: u8 = 2;
const SMC_PNETID_DEL: u8 = 3;
const SMC_PNETID_FLUSH: u8 = 4;

/// Registry attribute kinds.
const SMC_PNETID_ATTR_NAME: u16 = 1;
const SMC_PNETID_ATTR_ETHNAME: u16 = 2;
const SMC_PNETID_ATTR_IBNAME: u16 = 3;
const SMC_PNETID_ATTR_IBPORT: u16 = 4;

/// Bounded wait for registry replies; a hung registry surfaces as an
/// I/O error instead of blocking the process.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Receive buffer size for reply datagrams.
const RECV_BUF_LEN: usize = 8192;

/// A registry request or reply command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmcPnetidCmd {
    /// Dump all registry entries.
    Get,
    /// Add or update an entry.
    Add,
    /// Delete an entry by pnetid.
    Del,
    /// Remove all entries.
    Flush,
}

impl From<SmcPnetidCmd> for u8 {
    fn from(cmd: SmcPnetidCmd) -> u8 {
        match cmd {
            SmcPnetidCmd::Get => SMC_PNETID_GET,
            SmcPnetidCmd::Add => SMC_PNETID_ADD,
            SmcPnetidCmd::Del => SMC_PNETID_DEL,
            SmcPnetidCmd::Flush => SMC_PNETID_FLUSH,
        }
    }
}

impl TryFrom<u8> for SmcPnetidCmd {
    type Error = DecodeError;

    fn try_from(cmd: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match cmd {
            SMC_PNETID_GET => SmcPnetidCmd::Get,
            SMC_PNETID_ADD => SmcPnetidCmd::Add,
            SMC_PNETID_DEL => SmcPnetidCmd::Del,
            SMC_PNETID_FLUSH => SmcPnetidCmd::Flush,
            cmd => return Err(format!("unknown SMC_PNETID command {cmd}").into()),
        })
    }
}

/// A registry message attribute.
///
/// Parsing enforces the registry's attribute policy: NUL-terminated
/// strings with per-attribute length limits, and a single byte for the
/// port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmcPnetidAttr {
    /// Pnetid name, at most [`MAX_PNETID_LEN`] bytes.
    Name(String),
    /// Ethernet interface name.
    EthName(String),
    /// InfiniBand device name.
    IbName(String),
    /// InfiniBand port.
    IbPort(u8),
    /// Unknown attribute, carried through untouched.
    Other(DefaultNla),
}

impl Nla for SmcPnetidAttr {
    fn value_len(&self) -> usize {
        match self {
            SmcPnetidAttr::Name(s)
            | SmcPnetidAttr::EthName(s)
            | SmcPnetidAttr::IbName(s) => s.len() + 1,
            SmcPnetidAttr::IbPort(_) => 1,
            SmcPnetidAttr::Other(nla) => nla.value_len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            SmcPnetidAttr::Name(_) => SMC_PNETID_ATTR_NAME,
            SmcPnetidAttr::EthName(_) => SMC_PNETID_ATTR_ETHNAME,
            SmcPnetidAttr::IbName(_) => SMC_PNETID_ATTR_IBNAME,
            SmcPnetidAttr::IbPort(_) => SMC_PNETID_ATTR_IBPORT,
            SmcPnetidAttr::Other(nla) => nla.kind(),
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            SmcPnetidAttr::Name(s)
            | SmcPnetidAttr::EthName(s)
            | SmcPnetidAttr::IbName(s) => {
                buffer[..s.len()].copy_from_slice(s.as_bytes());
                buffer[s.len()] = 0;
            }
            SmcPnetidAttr::IbPort(port) => buffer[0] = *port,
            SmcPnetidAttr::Other(nla) => nla.emit_value(buffer),
        }
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for SmcPnetidAttr {
    fn parse(buf: &NlaBuffer<&'a T>) -> std::result::Result<Self, DecodeError> {
        let payload = buf.value();
        Ok(match buf.kind() {
            SMC_PNETID_ATTR_NAME => {
                check_string_len("NAME", payload, MAX_PNETID_LEN + 1)?;
                SmcPnetidAttr::Name(parse_string(payload)?)
            }
            SMC_PNETID_ATTR_ETHNAME => {
                check_string_len("ETHNAME", payload, IFNAMSIZ)?;
                SmcPnetidAttr::EthName(parse_string(payload)?)
            }
            SMC_PNETID_ATTR_IBNAME => {
                check_string_len("IBNAME", payload, IB_DEVICE_NAME_MAX)?;
                SmcPnetidAttr::IbName(parse_string(payload)?)
            }
            SMC_PNETID_ATTR_IBPORT => SmcPnetidAttr::IbPort(parse_u8(payload)?),
            _ => SmcPnetidAttr::Other(DefaultNla::parse(buf)?),
        })
    }
}

/// Attribute policy check for NUL-terminated strings.
fn check_string_len(
    attr: &str,
    payload: &[u8],
    max_len: usize,
) -> std::result::Result<(), DecodeError> {
    if payload.len() > max_len {
        return Err(format!(
            "{attr} attribute exceeds {max_len} bytes (got {})",
            payload.len()
        )
        .into());
    }
    Ok(())
}

/// A message of the `SMC_PNETID` family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmcPnetid {
    /// The command.
    pub cmd: SmcPnetidCmd,
    /// The attributes.
    pub nlas: Vec<SmcPnetidAttr>,
}

impl GenlFamily for SmcPnetid {
    fn family_name() -> &'static str {
        SMC_GENL_FAMILY_NAME
    }

    fn command(&self) -> u8 {
        self.cmd.into()
    }

    fn version(&self) -> u8 {
        SMC_GENL_FAMILY_VERSION
    }
}

impl Emitable for SmcPnetid {
    fn buffer_len(&self) -> usize {
        self.nlas.as_slice().buffer_len()
    }

    fn emit(&self, buffer: &mut [u8]) {
        self.nlas.as_slice().emit(buffer)
    }
}

impl ParseableParametrized<[u8], GenlHeader> for SmcPnetid {
    fn parse_with_param(
        buf: &[u8],
        header: GenlHeader,
    ) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            cmd: SmcPnetidCmd::try_from(header.cmd)?,
            nlas: parse_nlas(buf)?,
        })
    }
}

fn parse_nlas(buf: &[u8]) -> std::result::Result<Vec<SmcPnetidAttr>, DecodeError> {
    let mut nlas = Vec::new();
    for nla in NlasIterator::new(buf) {
        nlas.push(SmcPnetidAttr::parse(&nla?)?);
    }
    Ok(nlas)
}

/// Decodes a reply's attributes into a registry fact.
///
/// A reply without a NAME attribute is ignored; empty device names count
/// as absent. An InfiniBand name without a port is passed through so the
/// reconciler can log and discard it.
fn fact_from_nlas(nlas: &[SmcPnetidAttr]) -> Option<RegistryFact> {
    let mut name = None;
    let mut eth_name = None;
    let mut ib_name = None;
    let mut ib_port = None;
    for nla in nlas {
        match nla {
            SmcPnetidAttr::Name(s) => name = Some(s.clone()),
            SmcPnetidAttr::EthName(s) if !s.is_empty() => eth_name = Some(s.clone()),
            SmcPnetidAttr::IbName(s) if !s.is_empty() => ib_name = Some(s.clone()),
            SmcPnetidAttr::IbPort(port) => ib_port = Some(*port),
            _ => {}
        }
    }

    let pnetid = match Pnetid::new(name?) {
        Ok(pnetid) => pnetid,
        Err(err) => {
            warn!("ignoring registry entry: {}", err);
            return None;
        }
    };
    Some(RegistryFact {
        pnetid,
        eth_name,
        ib_name,
        ib_port,
    })
}

/// A connection to the pnetid registry.
///
/// The underlying socket closes when the client drops, on every exit
/// path.
pub struct RegistryClient {
    socket: Socket,
    family_id: u16,
    sequence: u32,
}

impl RegistryClient {
    /// Opens a netlink socket and resolves the registry family.
    pub fn connect() -> Result<Self> {
        debug!("initializing netlink socket");
        let mut socket =
            Socket::new(NETLINK_GENERIC).map_err(|e| Error::netlink("socket creation", e))?;
        socket
            .bind_auto()
            .map_err(|e| Error::netlink("socket bind", e))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink("socket connect", e))?;
        set_recv_timeout(&socket, RECV_TIMEOUT)
            .map_err(|e| Error::netlink("socket timeout setup", e))?;

        let mut client = Self {
            socket,
            family_id: 0,
            sequence: 0,
        };
        client.family_id = client.resolve_family()?;
        Ok(client)
    }

    /// Removes all pnetid entries from the registry.
    pub fn flush(&mut self) -> Result<()> {
        debug!("sending flush pnetids command over netlink socket");
        self.transact(SmcPnetidCmd::Flush, Vec::new())
    }

    /// Deletes a pnetid entry by name.
    pub fn delete(&mut self, pnetid: &Pnetid) -> Result<()> {
        debug!("sending delete pnetid command for \"{}\"", pnetid);
        self.transact(
            SmcPnetidCmd::Del,
            vec![SmcPnetidAttr::Name(pnetid.to_string())],
        )
    }

    /// Adds or updates a pnetid entry.
    ///
    /// When an InfiniBand name is given without a port,
    /// [`IB_DEFAULT_PORT`] is substituted. Whether at least one device
    /// name is present is the caller's contract, not checked here.
    pub fn set(
        &mut self,
        pnetid: &Pnetid,
        eth_name: Option<&str>,
        ib_name: Option<&str>,
        ib_port: Option<u8>,
    ) -> Result<()> {
        let mut nlas = vec![SmcPnetidAttr::Name(pnetid.to_string())];
        if let Some(eth_name) = eth_name {
            debug!(
                "adding pnetid \"{}\" on net device \"{}\"",
                pnetid, eth_name
            );
            nlas.push(SmcPnetidAttr::EthName(eth_name.to_string()));
        }
        if let Some(ib_name) = ib_name {
            let port = ib_port.unwrap_or(IB_DEFAULT_PORT);
            debug!(
                "adding pnetid \"{}\" on ib device \"{}\" port {}",
                pnetid, ib_name, port
            );
            nlas.push(SmcPnetidAttr::IbName(ib_name.to_string()));
            nlas.push(SmcPnetidAttr::IbPort(port));
        }
        self.transact(SmcPnetidCmd::Add, nlas)
    }

    /// Dumps all registry entries, feeding each decoded fact to the
    /// handler before returning.
    pub fn get(&mut self, mut handle: impl FnMut(RegistryFact)) -> Result<()> {
        debug!("sending get pnetids command over netlink socket");
        let msg = self.build_request(
            SmcPnetidCmd::Get,
            Vec::new(),
            NLM_F_REQUEST | NLM_F_DUMP,
        );
        self.send(&msg);
        self.drain(true, |genl: GenlMessage<SmcPnetid>| {
            if let Some(fact) = fact_from_nlas(&genl.payload.nlas) {
                handle(fact);
            }
        })
    }

    /// One acknowledged request round-trip.
    fn transact(&mut self, cmd: SmcPnetidCmd, nlas: Vec<SmcPnetidAttr>) -> Result<()> {
        let msg = self.build_request(cmd, nlas, NLM_F_REQUEST | NLM_F_ACK);
        self.send(&msg);
        self.drain(false, |_genl: GenlMessage<SmcPnetid>| {})
    }

    fn build_request(
        &mut self,
        cmd: SmcPnetidCmd,
        nlas: Vec<SmcPnetidAttr>,
        flags: u16,
    ) -> NetlinkMessage<GenlMessage<SmcPnetid>> {
        let mut genlmsg = GenlMessage::from_payload(SmcPnetid { cmd, nlas });
        genlmsg.set_resolved_family_id(self.family_id);
        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = flags;
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();
        nlmsg
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Sends one request. Send failures are logged and the exchange
    /// still awaits a reply; nothing is retried.
    fn send<F>(&self, msg: &NetlinkMessage<GenlMessage<F>>)
    where
        F: GenlFamily + Emitable + Debug,
    {
        let mut buf = vec![0u8; msg.buffer_len()];
        msg.serialize(&mut buf);
        if let Err(err) = self.socket.send(&buf, 0) {
            warn!("error sending netlink request: {}", err);
        }
    }

    /// Resolves the registry family id through the netlink controller.
    fn resolve_family(&mut self) -> Result<u16> {
        debug!(
            "resolving generic netlink family \"{}\"",
            SMC_GENL_FAMILY_NAME
        );
        let genlmsg = GenlMessage::from_payload(GenlCtrl {
            cmd: GenlCtrlCmd::GetFamily,
            nlas: vec![GenlCtrlAttrs::FamilyName(SMC_GENL_FAMILY_NAME.to_string())],
        });
        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST;
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();
        self.send(&nlmsg);

        let mut family_id = None;
        self.drain(false, |genl: GenlMessage<GenlCtrl>| {
            for nla in &genl.payload.nlas {
                if let GenlCtrlAttrs::FamilyId(id) = nla {
                    family_id = Some(*id);
                }
            }
        })?;
        family_id.ok_or_else(|| {
            Error::netlink(
                "family resolution",
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("generic netlink family \"{SMC_GENL_FAMILY_NAME}\" not found"),
                ),
            )
        })
    }

    /// Receives and dispatches replies.
    ///
    /// In dump mode, drains datagrams until the terminating DONE message.
    /// Otherwise one datagram (reply or acknowledgment) completes the
    /// exchange. A reply that fails attribute-policy validation is logged
    /// and skipped without aborting the session; a registry error message
    /// is logged.
    fn drain<F, H>(&self, dump: bool, mut handle: H) -> Result<()>
    where
        F: ParseableParametrized<[u8], GenlHeader> + Debug,
        H: FnMut(GenlMessage<F>),
    {
        let mut rx = vec![0u8; RECV_BUF_LEN];
        loop {
            let size = self
                .socket
                .recv(&mut &mut rx[..], 0)
                .map_err(|e| Error::netlink("receive", e))?;
            if size == 0 {
                return Ok(());
            }

            let mut offset = 0;
            while offset < size {
                let bytes = &rx[offset..size];
                let msg = match NetlinkMessage::<GenlMessage<F>>::deserialize(bytes) {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!("error parsing netlink reply: {}", err);
                        // skip the broken message, keep the rest of the
                        // datagram
                        match NetlinkBuffer::new_checked(&bytes) {
                            Ok(raw) if raw.length() > 0 => {
                                offset += raw.length() as usize;
                                continue;
                            }
                            _ => break,
                        }
                    }
                };
                let length = msg.header.length as usize;

                match msg.payload {
                    NetlinkPayload::InnerMessage(genl) => handle(genl),
                    NetlinkPayload::Error(err) if err.code.is_some() => {
                        error!("netlink error: {}", err.to_io());
                        return Ok(());
                    }
                    // an error message without a code is an acknowledgment
                    NetlinkPayload::Error(_) => return Ok(()),
                    NetlinkPayload::Done(_) => return Ok(()),
                    _ => {}
                }

                if length == 0 {
                    break;
                }
                offset += length;
            }

            if !dump {
                return Ok(());
            }
        }
    }
}

/// Applies the bounded reply wait to the socket.
fn set_recv_timeout(socket: &Socket, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    // SAFETY: plain setsockopt on a valid owned fd with a properly sized
    // timeval.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const libc::timeval as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pnetid_msg(cmd: SmcPnetidCmd, nlas: Vec<SmcPnetidAttr>) -> Vec<u8> {
        let mut genlmsg = GenlMessage::from_payload(SmcPnetid { cmd, nlas });
        genlmsg.set_resolved_family_id(0x1d);
        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST;
        nlmsg.finalize();
        let mut buf = vec![0u8; nlmsg.buffer_len()];
        nlmsg.serialize(&mut buf);
        buf
    }

    #[test]
    fn test_add_message_round_trip() {
        let buf = pnetid_msg(
            SmcPnetidCmd::Add,
            vec![
                SmcPnetidAttr::Name("PNETCTL".to_string()),
                SmcPnetidAttr::EthName("lo".to_string()),
                SmcPnetidAttr::IbName("mlx5_1".to_string()),
                SmcPnetidAttr::IbPort(1),
            ],
        );

        let msg = NetlinkMessage::<GenlMessage<SmcPnetid>>::deserialize(&buf).unwrap();
        let genl = match msg.payload {
            NetlinkPayload::InnerMessage(genl) => genl,
            payload => panic!("unexpected payload {payload:?}"),
        };
        assert_eq!(genl.payload.cmd, SmcPnetidCmd::Add);
        assert_eq!(genl.payload.nlas.len(), 4);
        assert_eq!(
            genl.payload.nlas[0],
            SmcPnetidAttr::Name("PNETCTL".to_string())
        );
        assert_eq!(genl.payload.nlas[3], SmcPnetidAttr::IbPort(1));
    }

    #[test]
    fn test_attr_policy_rejects_oversized_ethname() {
        let attr = SmcPnetidAttr::EthName("a".repeat(IFNAMSIZ + 4));
        let mut buf = vec![0u8; attr.buffer_len()];
        attr.emit(&mut buf);

        let nla = NlaBuffer::new_checked(&buf[..]).unwrap();
        assert!(SmcPnetidAttr::parse(&nla).is_err());
    }

    #[test]
    fn test_attr_policy_accepts_max_pnetid() {
        let attr = SmcPnetidAttr::Name("A234567890123456".to_string());
        let mut buf = vec![0u8; attr.buffer_len()];
        attr.emit(&mut buf);

        let nla = NlaBuffer::new_checked(&buf[..]).unwrap();
        let parsed = SmcPnetidAttr::parse(&nla).unwrap();
        assert_eq!(parsed, attr);
    }

    #[test]
    fn test_fact_requires_name() {
        let nlas = vec![SmcPnetidAttr::EthName("lo".to_string())];
        assert!(fact_from_nlas(&nlas).is_none());
    }

    #[test]
    fn test_fact_from_reply_attrs() {
        let nlas = vec![
            SmcPnetidAttr::Name("P1".to_string()),
            SmcPnetidAttr::EthName("lo".to_string()),
            SmcPnetidAttr::IbName("mlx5_1".to_string()),
            SmcPnetidAttr::IbPort(2),
        ];
        let fact = fact_from_nlas(&nlas).unwrap();
        assert_eq!(fact.pnetid.as_str(), "P1");
        assert_eq!(fact.eth_name.as_deref(), Some("lo"));
        assert_eq!(fact.ib_name.as_deref(), Some("mlx5_1"));
        assert_eq!(fact.ib_port, Some(2));
    }

    #[test]
    fn test_fact_treats_empty_names_as_absent() {
        let nlas = vec![
            SmcPnetidAttr::Name("P1".to_string()),
            SmcPnetidAttr::EthName(String::new()),
        ];
        let fact = fact_from_nlas(&nlas).unwrap();
        assert!(fact.eth_name.is_none());
    }

    #[test]
    fn test_unknown_attribute_is_carried() {
        // kind 200 is outside the registry's attribute set
        let raw: [u8; 8] = [8, 0, 200, 0, 1, 2, 3, 4];
        let nla = NlaBuffer::new_checked(&raw[..]).unwrap();
        let parsed = SmcPnetidAttr::parse(&nla).unwrap();
        assert!(matches!(parsed, SmcPnetidAttr::Other(_)));
    }
}
