// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

macro_rules! cfg_feature {
	($feature:literal, $($item:item)*) => {
		$(
			#[cfg(feature = $feature)]
			#[cfg_attr(docsrs, doc(cfg(feature = $feature)))]
			$item
		)*
	}
}

macro_rules! cfg_http_transport {
	($($item:item)*) => {
		crate::macros::cfg_feature!("http-transport", $($item)*);
	};
}

macro_rules! cfg_ws_transport {
	($($item:item)*) => {
		crate::macros::cfg_feature!("ws-transport", $($item)*);
	};
}

macro_rules! cfg_mock_transport {
	($($item:item)*) => {
		crate::macros::cfg_feature!("mock-transport", $($item)*);
	};
}

pub(crate) use {cfg_feature, cfg_http_transport, cfg_mock_transport, cfg_ws_transport};
