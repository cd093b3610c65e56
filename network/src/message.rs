//! Wire messages exchanged by the governance layer
//!
//! A message travels as a bincode envelope holding its command name and the
//! bincode payload of the object. On a stream each envelope is prefixed with
//! its length as a big-endian u32.

use crate::error::{NetworkError, Result};
use govnode_consensus::PaymentWinner;
use govnode_core::{Hash256, Inventory, OutPoint, Outbound, PeerId, SyncItem};
use govnode_masternode::{MasternodeBroadcast, MasternodePing};
use govnode_treasury::{BudgetVote, FinalizedBudgetBroadcast, FinalizedBudgetVote, ProposalBroadcast};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest encoded envelope accepted from a peer
pub const MAX_PAYLOAD_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Ping(MasternodePing),
    Broadcast(MasternodeBroadcast),
    /// Full list when `None`
    ListRequest(Option<OutPoint>),
    Winner(PaymentWinner),
    GetWinners(u32),
    Proposal(ProposalBroadcast),
    Vote(BudgetVote),
    FinalizedBudget(FinalizedBudgetBroadcast),
    FinalizedVote(FinalizedBudgetVote),
    /// Everything when `None`
    BudgetSync(Option<Hash256>),
    SyncStatusCount { item: SyncItem, count: u32 },
    Inv(Vec<Inventory>),
    GetData(Vec<Inventory>),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    command: String,
    payload: Vec<u8>,
}

fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| NetworkError::Encode(e.to_string()))
}

fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| NetworkError::Decode(e.to_string()))
}

/// Where a translated outbound message should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    AllPeers,
    Peer(PeerId),
}

impl WireMessage {
    pub fn command(&self) -> &'static str {
        match self {
            WireMessage::Ping(_) => "mnp",
            WireMessage::Broadcast(_) => "mnb",
            WireMessage::ListRequest(_) => "dseg",
            WireMessage::Winner(_) => "mnw",
            WireMessage::GetWinners(_) => "mnget",
            WireMessage::Proposal(_) => "mprop",
            WireMessage::Vote(_) => "mvote",
            WireMessage::FinalizedBudget(_) => "fbs",
            WireMessage::FinalizedVote(_) => "fbvote",
            WireMessage::BudgetSync(_) => "mnvs",
            WireMessage::SyncStatusCount { .. } => "ssc",
            WireMessage::Inv(_) => "inv",
            WireMessage::GetData(_) => "getdata",
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        match self {
            WireMessage::Ping(ping) => to_bytes(ping),
            WireMessage::Broadcast(mnb) => to_bytes(mnb),
            WireMessage::ListRequest(vin) => to_bytes(vin),
            WireMessage::Winner(winner) => to_bytes(winner),
            WireMessage::GetWinners(count) => to_bytes(count),
            WireMessage::Proposal(proposal) => to_bytes(proposal),
            WireMessage::Vote(vote) => to_bytes(vote),
            WireMessage::FinalizedBudget(budget) => to_bytes(budget),
            WireMessage::FinalizedVote(vote) => to_bytes(vote),
            WireMessage::BudgetSync(hash) => to_bytes(hash),
            WireMessage::SyncStatusCount { item, count } => to_bytes(&(item, count)),
            WireMessage::Inv(inv) | WireMessage::GetData(inv) => to_bytes(inv),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let envelope = Envelope {
            command: self.command().to_string(),
            payload: self.payload()?,
        };
        let bytes = to_bytes(&envelope)?;
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::PayloadTooLarge { size: bytes.len() });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::PayloadTooLarge { size: bytes.len() });
        }
        let envelope: Envelope = from_bytes(bytes)?;
        let payload = envelope.payload.as_slice();
        let message = match envelope.command.as_str() {
            "mnp" => WireMessage::Ping(from_bytes(payload)?),
            "mnb" => WireMessage::Broadcast(from_bytes(payload)?),
            "dseg" => WireMessage::ListRequest(from_bytes(payload)?),
            "mnw" => WireMessage::Winner(from_bytes(payload)?),
            "mnget" => WireMessage::GetWinners(from_bytes(payload)?),
            "mprop" => WireMessage::Proposal(from_bytes(payload)?),
            "mvote" => WireMessage::Vote(from_bytes(payload)?),
            "fbs" => WireMessage::FinalizedBudget(from_bytes(payload)?),
            "fbvote" => WireMessage::FinalizedVote(from_bytes(payload)?),
            "mnvs" => WireMessage::BudgetSync(from_bytes(payload)?),
            "ssc" => {
                let (item, count) = from_bytes(payload)?;
                WireMessage::SyncStatusCount { item, count }
            }
            "inv" => WireMessage::Inv(from_bytes(payload)?),
            "getdata" => WireMessage::GetData(from_bytes(payload)?),
            other => return Err(NetworkError::UnknownCommand(other.to_string())),
        };
        Ok(message)
    }

    /// Translate a component's outbound effect into a wire message.
    /// Misbehaviour reports stay with the transport and yield `None`.
    pub fn from_outbound(outbound: Outbound) -> Option<(Destination, WireMessage)> {
        match outbound {
            Outbound::Relay(inv) => Some((Destination::AllPeers, WireMessage::Inv(vec![inv]))),
            Outbound::PushInventory { peer, inventory } => {
                Some((Destination::Peer(peer), WireMessage::Inv(vec![inventory])))
            }
            Outbound::SyncStatusCount { peer, item, count } => Some((
                Destination::Peer(peer),
                WireMessage::SyncStatusCount { item, count },
            )),
            Outbound::RequestMasternodes { peer, outpoint } => {
                Some((Destination::Peer(peer), WireMessage::ListRequest(outpoint)))
            }
            Outbound::RequestWinners { peer, count } => {
                Some((Destination::Peer(peer), WireMessage::GetWinners(count)))
            }
            Outbound::RequestBudgetSync { peer, hash } => {
                Some((Destination::Peer(peer), WireMessage::BudgetSync(hash)))
            }
            Outbound::Misbehaving { .. } => None,
        }
    }
}

/// Write one length-prefixed message
pub async fn write_message<W>(writer: &mut W, message: &WireMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.encode()?;
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed message
pub async fn read_message<R>(reader: &mut R) -> Result<WireMessage>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(NetworkError::PayloadTooLarge { size: len });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    WireMessage::decode(&buf)
}
