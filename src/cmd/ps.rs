//! `ps` with any column selection.

use serde_json::{Map, Value};

use super::CommandParser;
use crate::helpers::{convert_data_to_type, header_columns, split_columns};
use crate::observer::{LineContext, LineDispatch};

/// Process listing parsed into one map per process.
///
/// Keys come from the header line printed first; values go through
/// [`convert_data_to_type`]. The free-text `CMD`/`COMMAND` column keeps its
/// inner spaces.
#[derive(Debug, Clone, Default)]
pub struct Ps {
    options: String,
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl Ps {
    pub fn new(options: impl Into<String>) -> Self {
        Self {
            options: options.into(),
            ..Self::default()
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl CommandParser for Ps {
    type Output = Vec<Map<String, Value>>;

    fn command_string(&self) -> String {
        let options = self.options.trim();
        if options.is_empty() {
            "ps".to_string()
        } else {
            format!("ps {options}")
        }
    }

    fn on_line(
        &mut self,
        line: &str,
        is_full_line: bool,
        _ctx: &mut LineContext<'_, Self::Output>,
    ) -> LineDispatch {
        if !is_full_line {
            return LineDispatch::NotClaimed;
        }
        if self.columns.is_empty() {
            self.columns = header_columns(line);
            return if self.columns.is_empty() {
                LineDispatch::NotClaimed
            } else {
                LineDispatch::Claimed
            };
        }
        let Some(values) = split_columns(line, &self.columns) else {
            return LineDispatch::NotClaimed;
        };
        let row = self
            .columns
            .iter()
            .zip(values)
            .map(|(column, value)| (column.clone(), convert_data_to_type(&value)))
            .collect();
        self.rows.push(row);
        LineDispatch::Claimed
    }

    fn result(&self) -> Option<Self::Output> {
        (!self.rows.is_empty()).then(|| self.rows.clone())
    }
}

pub const COMMAND_OPTIONS_V1: &str = "-o user,pid,vsz,osz,pmem,rss,cmd -e";

pub const COMMAND_OUTPUT_V1: &str = "
root@DMICTRL:~# ps -o user,pid,vsz,osz,pmem,rss,cmd -e
 USER       PID    VSZ SZ %MEM   RSS COMMAND
 root         1   1664  -  0.1   572 init [3]
 root         2      0  -  0.0     0 [ksoftirqd/0]
 root         3      0  -  0.0     0 [desched/0]
 root         4      0  -  0.0     0 [events/0]
 root         5      0  -  0.0     0 [khelper]
 root        10      0  -  0.0     0 [kthread]
 root        34      0  -  0.0     0 [kblockd/0]
 root        67      0  -  0.0     0 [pdflush]
 root        68      0  -  0.0     0 [pdflush]
 root        70      0  -  0.0     0 [aio/0]
 root        69      0  -  0.0     0 [kswapd0]
 root       665      0  -  0.0     0 [kjournald]
 bin        814   1908  -  0.1   544 /sbin/portmap
 root       847   1772  -  0.1   712 /sbin/syslogd -r
 root       855   1664  -  0.0   500 /sbin/klogd -x
 root@DMICTRL:~#
 ";

pub const COMMAND_RESULT_V1: &str = r#"[
    {"USER": "root", "PID": 1, "VSZ": 1664, "SZ": "-", "%MEM": 0.1, "RSS": 572, "COMMAND": "init [3]"},
    {"USER": "root", "PID": 2, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[ksoftirqd/0]"},
    {"USER": "root", "PID": 3, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[desched/0]"},
    {"USER": "root", "PID": 4, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[events/0]"},
    {"USER": "root", "PID": 5, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[khelper]"},
    {"USER": "root", "PID": 10, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[kthread]"},
    {"USER": "root", "PID": 34, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[kblockd/0]"},
    {"USER": "root", "PID": 67, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[pdflush]"},
    {"USER": "root", "PID": 68, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[pdflush]"},
    {"USER": "root", "PID": 70, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[aio/0]"},
    {"USER": "root", "PID": 69, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[kswapd0]"},
    {"USER": "root", "PID": 665, "VSZ": 0, "SZ": "-", "%MEM": 0.0, "RSS": 0, "COMMAND": "[kjournald]"},
    {"USER": "bin", "PID": 814, "VSZ": 1908, "SZ": "-", "%MEM": 0.1, "RSS": 544, "COMMAND": "/sbin/portmap"},
    {"USER": "root", "PID": 847, "VSZ": 1772, "SZ": "-", "%MEM": 0.1, "RSS": 712, "COMMAND": "/sbin/syslogd -r"},
    {"USER": "root", "PID": 855, "VSZ": 1664, "SZ": "-", "%MEM": 0.0, "RSS": 500, "COMMAND": "/sbin/klogd -x"}
]"#;

pub const COMMAND_OPTIONS_V2: &str = "-ef";

pub const COMMAND_OUTPUT_V2: &str = "FZM-FDD-086-ws-kvm:/home/rtg # ps -ef
UID        PID  PPID  C STIME TTY          TIME CMD
avahi-a+  3597     1  0  2017 ?        00:00:45 avahi-autoipd: [ens4] sleeping
root      3598  3597  0  2017 ?        00:00:00 avahi-autoipd: [ens4] callout dispatcher
root      3681     1  0  2017 ?        00:00:17 /sbin/dhclient6 -6 -cf /var/lib/dhcp6/dhclient6.ens3.conf -lf /var/lib/dhcp6/dhclient6.ens3.lease -pf
root      3812     1  0  2017 ?        00:00:00 /usr/sbin/xinetd -stayalive -dontfork
root      3814     1  0  2017 ?        00:00:00 /usr/sbin/vsftpd /etc/vsftpd.conf
root      3826     1  0  2017 ?        00:00:02 /usr/sbin/sshd -D
root      3835     2  0  2017 ?        00:00:00 [cifsiod]
root      3867     1  0  2017 ?        00:00:18 /usr/sbin/cron -n
root      3870     1  0  2017 tty1     00:00:00 /sbin/agetty --noclear tty1 linux
avahi-a+  4592     1  0  2017 ?        00:17:15 avahi-autoipd: [ens3] sleeping
root      4593  4592  0  2017 ?        00:00:00 avahi-autoipd: [ens3] callout dispatcher
root      4648     1  0  2017 ?        00:00:00 /sbin/dhcpcd --netconfig -L -E -HHH -c /etc/sysconfig/network/scripts/dhcpcd-hook -t 0 -h FZM-FDD-086-
root      5823     2  0 Mar09 ?        00:00:03 [kworker/u8:2]
FZM-FDD-086-ws-kvm:/home/rtg #
";

pub const COMMAND_RESULT_V2: &str = r#"[
    {"UID": "avahi-a+", "PID": 3597, "PPID": 1, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:45",
     "CMD": "avahi-autoipd: [ens4] sleeping"},
    {"UID": "root", "PID": 3598, "PPID": 3597, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:00",
     "CMD": "avahi-autoipd: [ens4] callout dispatcher"},
    {"UID": "root", "PID": 3681, "PPID": 1, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:17",
     "CMD": "/sbin/dhclient6 -6 -cf /var/lib/dhcp6/dhclient6.ens3.conf -lf /var/lib/dhcp6/dhclient6.ens3.lease -pf"},
    {"UID": "root", "PID": 3812, "PPID": 1, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:00",
     "CMD": "/usr/sbin/xinetd -stayalive -dontfork"},
    {"UID": "root", "PID": 3814, "PPID": 1, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:00",
     "CMD": "/usr/sbin/vsftpd /etc/vsftpd.conf"},
    {"UID": "root", "PID": 3826, "PPID": 1, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:02",
     "CMD": "/usr/sbin/sshd -D"},
    {"UID": "root", "PID": 3835, "PPID": 2, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:00", "CMD": "[cifsiod]"},
    {"UID": "root", "PID": 3867, "PPID": 1, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:18",
     "CMD": "/usr/sbin/cron -n"},
    {"UID": "root", "PID": 3870, "PPID": 1, "C": 0, "STIME": 2017, "TTY": "tty1", "TIME": "00:00:00",
     "CMD": "/sbin/agetty --noclear tty1 linux"},
    {"UID": "avahi-a+", "PID": 4592, "PPID": 1, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:17:15",
     "CMD": "avahi-autoipd: [ens3] sleeping"},
    {"UID": "root", "PID": 4593, "PPID": 4592, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:00",
     "CMD": "avahi-autoipd: [ens3] callout dispatcher"},
    {"UID": "root", "PID": 4648, "PPID": 1, "C": 0, "STIME": 2017, "TTY": "?", "TIME": "00:00:00",
     "CMD": "/sbin/dhcpcd --netconfig -L -E -HHH -c /etc/sysconfig/network/scripts/dhcpcd-hook -t 0 -h FZM-FDD-086-"},
    {"UID": "root", "PID": 5823, "PPID": 2, "C": 0, "STIME": "Mar09", "TTY": "?", "TIME": "00:00:03",
     "CMD": "[kworker/u8:2]"}
]"#;

pub const COMMAND_OPTIONS_V3: &str = "-ef";

/// Same processes with the free-text column before `TIME`.
pub const COMMAND_OUTPUT_V3: &str = "FZM-FDD-086-ws-kvm:/home/rtg # ps -ef
UID        PID  PPID  C STIME TTY   CMD                                                                                                                 TIME
avahi-a+  3597     1  0  2017 ?     avahi-autoipd: [ens4] sleeping                                                                                      00:00:45
root      3598  3597  0  2017 ?     avahi-autoipd: [ens4] callout dispatcher                                                                            00:00:00
root      3681     1  0  2017 ?     /sbin/dhclient6 -6 -cf /var/lib/dhcp6/dhclient6.ens3.conf -lf /var/lib/dhcp6/dhclient6.ens3.lease -pf               00:00:17
root      3812     1  0  2017 ?     /usr/sbin/xinetd -stayalive -dontfork                                                                               00:00:00
root      3814     1  0  2017 ?     /usr/sbin/vsftpd /etc/vsftpd.conf                                                                                   00:00:00
root      3826     1  0  2017 ?     /usr/sbin/sshd -D                                                                                                   00:00:02
root      3835     2  0  2017 ?     [cifsiod]                                                                                                           00:00:00
root      3867     1  0  2017 ?     /usr/sbin/cron -n                                                                                                   00:00:18
root      3870     1  0  2017 tty1  /sbin/agetty --noclear tty1 linux                                                                                   00:00:00
avahi-a+  4592     1  0  2017 ?     avahi-autoipd: [ens3] sleeping                                                                                      00:17:15
root      4593  4592  0  2017 ?     avahi-autoipd: [ens3] callout dispatcher                                                                            00:00:00
root      4648     1  0  2017 ?     /sbin/dhcpcd --netconfig -L -E -HHH -c /etc/sysconfig/network/scripts/dhcpcd-hook -t 0 -h FZM-FDD-086-              00:00:00
root      5823     2  0 Mar09 ?     [kworker/u8:2]                                                                                                      00:00:03
FZM-FDD-086-ws-kvm:/home/rtg #
";

pub const COMMAND_RESULT_V3: &str = COMMAND_RESULT_V2;
