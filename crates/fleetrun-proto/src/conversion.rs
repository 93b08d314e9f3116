use crate::protocol;
use crate::v1;
use fleetrun_core::State;

pub fn state_to_proto(state: State) -> v1::State {
    match state {
        State::Unknown => v1::State::Unknown,
        State::Changed => v1::State::Changed,
        State::Unchanged => v1::State::Unchanged,
    }
}

pub fn state_from_proto(state: v1::State) -> State {
    match state {
        v1::State::Unknown => State::Unknown,
        v1::State::Changed => State::Changed,
        v1::State::Unchanged => State::Unchanged,
    }
}

/// Decode a raw wire value; unrecognised values are treated as UNKNOWN.
pub fn state_from_wire(value: i32) -> State {
    v1::State::try_from(value)
        .map(state_from_proto)
        .unwrap_or(State::Unknown)
}

// ServiceResponse
impl From<protocol::ServiceResponse> for v1::ServiceResponse {
    fn from(res: protocol::ServiceResponse) -> Self {
        Self {
            state: state_to_proto(res.state) as i32,
            message: res.message,
        }
    }
}

impl From<v1::ServiceResponse> for protocol::ServiceResponse {
    fn from(res: v1::ServiceResponse) -> Self {
        Self {
            state: state_from_wire(res.state),
            message: res.message,
        }
    }
}

// ServiceStatusResponse
impl From<protocol::ServiceStatusResponse> for v1::ServiceStatusResponse {
    fn from(res: protocol::ServiceStatusResponse) -> Self {
        Self {
            state: state_to_proto(res.state) as i32,
            load_state: res.load_state,
            active_state: res.active_state,
            sub_state: res.sub_state,
        }
    }
}

impl From<v1::ServiceStatusResponse> for protocol::ServiceStatusResponse {
    fn from(res: v1::ServiceStatusResponse) -> Self {
        Self {
            state: state_from_wire(res.state),
            load_state: res.load_state,
            active_state: res.active_state,
            sub_state: res.sub_state,
        }
    }
}

// CommandResponse
impl From<protocol::CommandResponse> for v1::CommandResponse {
    fn from(res: protocol::CommandResponse) -> Self {
        Self {
            state: state_to_proto(res.state) as i32,
            message: res.message,
        }
    }
}

impl From<v1::CommandResponse> for protocol::CommandResponse {
    fn from(res: v1::CommandResponse) -> Self {
        Self {
            state: state_from_wire(res.state),
            message: res.message,
        }
    }
}

// CpuUsageResponse
impl From<protocol::CpuUsageResponse> for v1::CpuUsageResponse {
    fn from(res: protocol::CpuUsageResponse) -> Self {
        Self {
            load_avg1: res.load_avg1,
            load_avg5: res.load_avg5,
            load_avg15: res.load_avg15,
        }
    }
}

impl From<v1::CpuUsageResponse> for protocol::CpuUsageResponse {
    fn from(res: v1::CpuUsageResponse) -> Self {
        Self {
            load_avg1: res.load_avg1,
            load_avg5: res.load_avg5,
            load_avg15: res.load_avg15,
        }
    }
}

// FileReadResponse
impl From<protocol::FileReadResponse> for v1::FileReadResponse {
    fn from(res: protocol::FileReadResponse) -> Self {
        Self {
            state: state_to_proto(res.state) as i32,
            content: res.content,
        }
    }
}

impl From<v1::FileReadResponse> for protocol::FileReadResponse {
    fn from(res: v1::FileReadResponse) -> Self {
        Self {
            state: state_from_wire(res.state),
            content: res.content,
        }
    }
}
