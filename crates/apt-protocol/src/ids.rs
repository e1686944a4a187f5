//! APT message catalog.
//!
//! Only the subset needed for discovery, enable/disable, homing, absolute
//! moves and status polling is listed.

/// MGMSG_HW_REQ_INFO: hardware identity request (discovery, initialization).
pub const HW_REQ_INFO: u16 = 0x0005;
/// MGMSG_HW_GET_INFO: 84-byte hardware identity reply.
pub const HW_GET_INFO: u16 = 0x0006;
/// MGMSG_HW_NO_FLASH_PROGRAMMING: enables unsolicited confirmations.
pub const HW_NO_FLASH_PROGRAMMING: u16 = 0x0018;
/// MGMSG_MOD_SET_CHANENABLESTATE: param2 = 1 enable, 2 disable.
pub const MOD_SET_CHANENABLESTATE: u16 = 0x0210;
/// MGMSG_MOD_IDENTIFY: blink the front panel LED.
pub const MOD_IDENTIFY: u16 = 0x0223;
/// MGMSG_MOT_REQ_ENCCOUNTER.
pub const MOT_REQ_ENCCOUNTER: u16 = 0x040A;
/// MGMSG_MOT_GET_ENCCOUNTER: channel + encoder count.
pub const MOT_GET_ENCCOUNTER: u16 = 0x040B;
/// MGMSG_MOT_REQ_POSCOUNTER.
pub const MOT_REQ_POSCOUNTER: u16 = 0x0411;
/// MGMSG_MOT_GET_POSCOUNTER: channel + position counter.
pub const MOT_GET_POSCOUNTER: u16 = 0x0412;
/// MGMSG_MOT_MOVE_HOME: start homing.
pub const MOT_MOVE_HOME: u16 = 0x0443;
/// MGMSG_MOT_MOVE_HOMED: homing finished (wait sentinel).
pub const MOT_MOVE_HOMED: u16 = 0x0444;
/// MGMSG_MOT_MOVE_ABSOLUTE: long form, channel + i32 target.
pub const MOT_MOVE_ABSOLUTE: u16 = 0x0453;
/// MGMSG_MOT_MOVE_COMPLETED: move finished (wait sentinel).
pub const MOT_MOVE_COMPLETED: u16 = 0x0464;
/// MGMSG_MOT_REQ_DCSTATUSUPDATE.
pub const MOT_REQ_DCSTATUSUPDATE: u16 = 0x0490;
/// MGMSG_MOT_GET_DCSTATUSUPDATE: 20-byte status reply.
pub const MOT_GET_DCSTATUSUPDATE: u16 = 0x0491;
/// MGMSG_MOT_ACK_DCSTATUSUPDATE: the keep-alive.
pub const MOT_ACK_DCSTATUSUPDATE: u16 = 0x0492;

/// Human-readable name for logging.
pub fn name(message_id: u16) -> &'static str {
    match message_id {
        HW_REQ_INFO => "HW_REQ_INFO",
        HW_GET_INFO => "HW_GET_INFO",
        HW_NO_FLASH_PROGRAMMING => "HW_NO_FLASH_PROGRAMMING",
        MOD_SET_CHANENABLESTATE => "MOD_SET_CHANENABLESTATE",
        MOD_IDENTIFY => "MOD_IDENTIFY",
        MOT_REQ_ENCCOUNTER => "MOT_REQ_ENCCOUNTER",
        MOT_GET_ENCCOUNTER => "MOT_GET_ENCCOUNTER",
        MOT_REQ_POSCOUNTER => "MOT_REQ_POSCOUNTER",
        MOT_GET_POSCOUNTER => "MOT_GET_POSCOUNTER",
        MOT_MOVE_HOME => "MOT_MOVE_HOME",
        MOT_MOVE_HOMED => "MOT_MOVE_HOMED",
        MOT_MOVE_ABSOLUTE => "MOT_MOVE_ABSOLUTE",
        MOT_MOVE_COMPLETED => "MOT_MOVE_COMPLETED",
        MOT_REQ_DCSTATUSUPDATE => "MOT_REQ_DCSTATUSUPDATE",
        MOT_GET_DCSTATUSUPDATE => "MOT_GET_DCSTATUSUPDATE",
        MOT_ACK_DCSTATUSUPDATE => "MOT_ACK_DCSTATUSUPDATE",
        _ => "UNKNOWN",
    }
}
